use argh::FromArgs;
use std::path::PathBuf;

#[derive(FromArgs, Debug)]
/// Optional command line arguments
pub struct TopLevelCmd {
    /// specify config file path, creates file if it doesn't exist
    #[argh(option, short = 'c')]
    pub config_override: Option<PathBuf>,
    /// config file must exist, including "config_override" files
    #[argh(switch, short = 'r')]
    pub config_required: bool,
    /// use config file as-is (don't save over it)
    #[argh(switch, short = 'n')]
    pub no_save: bool,
    /// select the patient for this session by UUID or name
    #[argh(option, short = 'p')]
    pub patient: Option<String>,
    #[argh(subcommand)]
    pub subcommands: Option<SubCommands>,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
pub enum SubCommands {
    Ble(BleCmd),
    Sim(SimCmd),
}

/// connect to a BLE device with the HR Measure characteristic
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "ble")]
pub struct BleCmd {
    /// connect to this address instead of the saved/first device
    #[argh(option, short = 'a')]
    pub address: Option<String>,
}

/// stream a synthesized ECG for demos and pipeline testing
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "sim")]
pub struct SimCmd {}

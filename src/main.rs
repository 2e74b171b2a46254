use cardiowatch::args::TopLevelCmd;

#[tokio::main]
async fn main() -> cardiowatch::AppResult<()> {
    let arg_config: TopLevelCmd = argh::from_env();
    cardiowatch::run(arg_config).await
}

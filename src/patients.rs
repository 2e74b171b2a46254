use serde_derive::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use tracing::info;
use uuid::Uuid;

use std::{collections::BTreeMap, path::PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Patient {
    pub name: String,
    #[serde(default)]
    pub birth_year: Option<u16>,
    #[serde(default)]
    pub notes: String,
    /// Address of the strap usually worn by this patient, if any.
    #[serde(default)]
    pub device_address: String,
}

/// What recorders tag sessions with: the patient's UUID (when one is
/// selected) and a filesystem/document-safe label.
#[derive(Debug, Clone, Default)]
pub struct PatientTag {
    pub id: Option<Uuid>,
    pub label: String,
}

impl PatientTag {
    pub fn unassigned() -> Self {
        Self {
            id: None,
            label: "unassigned".to_string(),
        }
    }
}

fn label_for(name: &str, id: &Uuid) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let cleaned = cleaned.trim_matches('-');
    if cleaned.is_empty() {
        id.simple().to_string()
    } else {
        cleaned.to_string()
    }
}

#[serde_as]
#[derive(Debug, Serialize, Deserialize, Default)]
struct RosterFile {
    /// Used to restore the selection on the next run if `remember_last` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_patient: Option<Uuid>,
    #[serde_as(as = "BTreeMap<DisplayFromStr, _>")]
    #[serde(default)]
    patients: BTreeMap<Uuid, Patient>,
}

pub struct Patients {
    pub current: Option<Uuid>,
    file: RosterFile,
    path: PathBuf,
}

impl Patients {
    pub fn new(roster_path: &str) -> Self {
        Self {
            current: None,
            file: RosterFile::default(),
            path: PathBuf::from(roster_path),
        }
    }

    pub async fn save(&mut self) -> Result<(), AppError> {
        self.file.last_patient = self.current;
        let mut file = File::create(&self.path).await?;
        let buffer = toml::to_string(&self.file)?;
        file.write_all(buffer.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        info!("Serialized roster length: {}", buffer.len());
        Ok(())
    }

    pub async fn load(&mut self, remember_last: bool) -> Result<(), AppError> {
        if !self.path.exists() {
            let mut file = File::create(&self.path).await?;
            let default = RosterFile::default();
            file.write_all(toml::to_string(&default)?.as_bytes())
                .await?;
            file.flush().await?;
            file.sync_all().await?;
            self.file = default;
        } else {
            let mut file = File::open(&self.path).await?;
            let mut buffer = String::new();
            file.read_to_string(&mut buffer).await?;
            self.file = toml::from_str(&buffer)?;
            if remember_last {
                if let Some(last) = self.file.last_patient {
                    if self.file.patients.contains_key(&last) {
                        self.current = Some(last);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn add(&mut self, patient: Patient) -> Uuid {
        let id = Uuid::new_v4();
        self.file.patients.insert(id, patient);
        id
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<Patient> {
        if self.current == Some(*id) {
            self.current = None;
        }
        self.file.patients.remove(id)
    }

    pub fn get(&self, id: &Uuid) -> Option<&Patient> {
        self.file.patients.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.file.patients.is_empty()
    }

    /// Selects a patient by UUID or case-insensitive name substring.
    /// An ambiguous or unknown query is an error, not a guess.
    pub fn select(&mut self, query: &str) -> Result<Uuid, AppError> {
        if let Ok(id) = Uuid::parse_str(query) {
            if self.file.patients.contains_key(&id) {
                self.current = Some(id);
                return Ok(id);
            }
            return Err(AppError::UnknownPatient(query.to_string()));
        }
        let pattern = query.to_lowercase();
        let matches: Vec<Uuid> = self
            .file
            .patients
            .iter()
            .filter(|(_, patient)| patient.name.to_lowercase().contains(&pattern))
            .map(|(id, _)| *id)
            .collect();
        match matches.as_slice() {
            [id] => {
                self.current = Some(*id);
                Ok(*id)
            }
            _ => Err(AppError::UnknownPatient(query.to_string())),
        }
    }

    pub fn selected_tag(&self) -> PatientTag {
        match self.current.and_then(|id| self.get(&id).map(|p| (id, p))) {
            Some((id, patient)) => PatientTag {
                id: Some(id),
                label: label_for(&patient.name, &id),
            },
            None => PatientTag::unassigned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> Patient {
        Patient {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn roster_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patients.toml");
        let path_str = path.to_str().unwrap();

        let mut roster = Patients::new(path_str);
        roster.load(true).await.unwrap();
        assert!(roster.is_empty());

        let id = roster.add(named("Ada Lovelace"));
        roster.current = Some(id);
        roster.save().await.unwrap();

        let mut reloaded = Patients::new(path_str);
        reloaded.load(true).await.unwrap();
        assert_eq!(reloaded.current, Some(id));
        assert_eq!(reloaded.get(&id).unwrap().name, "Ada Lovelace");
    }

    #[tokio::test]
    async fn remember_last_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patients.toml");
        let path_str = path.to_str().unwrap();

        let mut roster = Patients::new(path_str);
        roster.load(true).await.unwrap();
        let id = roster.add(named("Grace"));
        roster.current = Some(id);
        roster.save().await.unwrap();

        let mut reloaded = Patients::new(path_str);
        reloaded.load(false).await.unwrap();
        assert_eq!(reloaded.current, None);
    }

    #[test]
    fn select_by_name_and_uuid() {
        let mut roster = Patients::new("unused.toml");
        let ada = roster.add(named("Ada Lovelace"));
        let grace = roster.add(named("Grace Hopper"));

        assert_eq!(roster.select("grace").unwrap(), grace);
        assert_eq!(roster.select(&ada.to_string()).unwrap(), ada);
        // Substring matching both entries is ambiguous
        roster.add(named("Ada Byron"));
        assert!(roster.select("ada").is_err());
        assert!(roster.select("nobody").is_err());
        assert!(roster.select(&Uuid::new_v4().to_string()).is_err());
    }

    #[test]
    fn tags_are_path_safe() {
        let mut roster = Patients::new("unused.toml");
        let id = roster.add(named("Dr. Strange / Ward 9"));
        roster.current = Some(id);
        let tag = roster.selected_tag();
        assert_eq!(tag.id, Some(id));
        assert!(tag
            .label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-'));

        roster.current = None;
        assert_eq!(roster.selected_tag().label, "unassigned");
    }

    #[test]
    fn removing_selected_patient_clears_selection() {
        let mut roster = Patients::new("unused.toml");
        let id = roster.add(named("Ada"));
        roster.current = Some(id);
        assert!(roster.remove(&id).is_some());
        assert_eq!(roster.current, None);
        assert!(roster.remove(&id).is_none());
    }
}

//! Archetype library
//!
//! Loaded once at startup / level load and then only read. Profiles are
//! handed out as `Arc`s so any number of voices can share one asset without
//! synchronization.

use crate::profile::{Archetype, ArchetypeProfile};
use crate::{AeError, AeResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Compact archetype identity used for clustering keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArchetypeId(pub u16);

/// Collection of loaded archetype profiles
#[derive(Debug, Clone, Default)]
pub struct ArchetypeLibrary {
    profiles: Vec<Arc<ArchetypeProfile>>,
    by_name: HashMap<String, ArchetypeId>,
}

impl ArchetypeLibrary {
    /// Create an empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Library holding every built-in preset
    pub fn with_presets() -> Self {
        let mut library = Self::new();
        for archetype in Archetype::ALL {
            // Presets are validated by their own tests; a failure here is a bug.
            if let Err(e) = library.insert(ArchetypeProfile::preset(archetype)) {
                log::error!("Built-in preset {} rejected: {}", archetype.name(), e);
            }
        }
        library
    }

    /// Load a library from a JSON array of profiles
    pub fn from_json(json: &str) -> AeResult<Self> {
        let profiles: Vec<ArchetypeProfile> = serde_json::from_str(json)?;
        let mut library = Self::new();
        for profile in profiles {
            library.insert(profile)?;
        }
        log::info!("Loaded {} archetype profiles", library.len());
        Ok(library)
    }

    /// Save every profile as a JSON array
    pub fn to_json(&self) -> AeResult<String> {
        let profiles: Vec<&ArchetypeProfile> = self.profiles.iter().map(|p| p.as_ref()).collect();
        Ok(serde_json::to_string_pretty(&profiles)?)
    }

    /// Validate and add a profile; a profile with an existing name replaces it
    pub fn insert(&mut self, profile: ArchetypeProfile) -> AeResult<ArchetypeId> {
        profile.validate()?;

        if let Some(&id) = self.by_name.get(&profile.name) {
            log::debug!("Replacing archetype profile '{}'", profile.name);
            self.profiles[id.0 as usize] = Arc::new(profile);
            return Ok(id);
        }

        if self.profiles.len() >= u16::MAX as usize {
            return Err(AeError::Profile("too many archetype profiles".to_string()));
        }

        let id = ArchetypeId(self.profiles.len() as u16);
        self.by_name.insert(profile.name.clone(), id);
        self.profiles.push(Arc::new(profile));
        Ok(id)
    }

    /// Profile by id
    pub fn get(&self, id: ArchetypeId) -> Option<&Arc<ArchetypeProfile>> {
        self.profiles.get(id.0 as usize)
    }

    /// Id of a profile by name
    pub fn id_of(&self, name: &str) -> AeResult<ArchetypeId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| AeError::UnknownArchetype(name.to_string()))
    }

    /// Profile by name
    pub fn by_name(&self, name: &str) -> AeResult<&Arc<ArchetypeProfile>> {
        let id = self.id_of(name)?;
        self.get(id)
            .ok_or_else(|| AeError::UnknownArchetype(name.to_string()))
    }

    /// Iterate `(id, profile)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (ArchetypeId, &Arc<ArchetypeProfile>)> {
        self.profiles
            .iter()
            .enumerate()
            .map(|(i, p)| (ArchetypeId(i as u16), p))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

use super::program::CompiledWorkflow;
use crate::error::GenerateError;
use bincode::config::standard;
use bincode::serde::{decode_from_slice, encode_to_vec};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

impl CompiledWorkflow {
    /// Serializes the program with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, GenerateError> {
        encode_to_vec(self, standard())
            .map_err(|e| GenerateError::Artifact(format!("Serialization failed: {}", e)))
    }

    /// Saves the program to a file in the bincode format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), GenerateError> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        let mut file = fs::File::create(path).map_err(|e| {
            GenerateError::Artifact(format!("Could not create file '{}': {}", path.display(), e))
        })?;
        file.write_all(&bytes).map_err(|e| {
            GenerateError::Artifact(format!("Could not write to file '{}': {}", path.display(), e))
        })?;
        Ok(())
    }

    /// Loads a program written by [`CompiledWorkflow::save`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GenerateError> {
        let path = path.as_ref();
        let mut file = fs::File::open(path).map_err(|e| {
            GenerateError::Artifact(format!("Could not open file '{}': {}", path.display(), e))
        })?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(|e| {
            GenerateError::Artifact(format!("Could not read from file '{}': {}", path.display(), e))
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GenerateError> {
        decode_from_slice(bytes, standard())
            .map(|(program, _)| program)
            .map_err(|e| GenerateError::Artifact(format!("Deserialization failed: {}", e)))
    }
}

//! Descriptor documents and store snapshots.
//!
//! Computation descriptors are persisted as JSON documents
//! `{type, options: {target}, uuid, public}`. Callback fields appear as
//! `"fn::<key>"` strings and are rebound through a [`CallbackRegistry`] when
//! loaded, so only keys the hosting program registered can ever run.
//!
//! The in-memory store is snapshotted with `MessagePack`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use reactant_engine::{BoundComputation, CallbackRegistry, Computation, ComputationSet, Target};
use reactant_foundation::{Error, Result};
use reactant_storage::{MemoryStore, Schema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use uuid::Uuid;

use crate::interaction::Interaction;

/// Non-public options of a descriptor document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentOptions {
    /// What the computation computes.
    pub target: Target,
}

fn json_error(e: &serde_json::Error) -> Error {
    Error::serialization(e.to_string())
}

// =============================================================================
// Descriptor documents
// =============================================================================

/// Renders one bound computation as a document.
///
/// # Errors
///
/// Returns a serialization error if the descriptor cannot be encoded.
pub fn to_document(bound: &BoundComputation) -> Result<Json> {
    let Json::Object(mut doc) = serde_json::to_value(&bound.computation).map_err(|e| json_error(&e))? else {
        return Err(Error::serialization("computation did not encode as an object"));
    };
    let options = DocumentOptions {
        target: bound.target.clone(),
    };
    doc.insert("options".into(), serde_json::to_value(options).map_err(|e| json_error(&e))?);
    doc.insert("uuid".into(), Json::String(bound.uuid.to_string()));
    Ok(Json::Object(doc))
}

/// Splits a document into its uuid, target and (unbound) computation.
///
/// # Errors
///
/// Returns a serialization error for a malformed document.
pub fn from_document(doc: Json) -> Result<(Uuid, Target, Computation)> {
    let Json::Object(mut doc) = doc else {
        return Err(Error::serialization("descriptor document must be an object"));
    };
    let uuid = doc
        .remove("uuid")
        .ok_or_else(|| Error::serialization("descriptor document without uuid"))?;
    let uuid: Uuid = serde_json::from_value(uuid).map_err(|e| json_error(&e))?;
    let options = doc
        .remove("options")
        .ok_or_else(|| Error::serialization(format!("descriptor {uuid} without options")))?;
    let options: DocumentOptions = serde_json::from_value(options).map_err(|e| json_error(&e))?;
    let computation: Computation = serde_json::from_value(Json::Object(doc))
        .map_err(|e| Error::serialization(format!("descriptor {uuid}: {e}")))?;
    Ok((uuid, options.target, computation))
}

/// Encodes every computation of a set as a JSON array of documents.
///
/// # Errors
///
/// Returns a serialization error if a descriptor cannot be encoded.
pub fn computations_to_json(set: &ComputationSet) -> Result<String> {
    let docs = set.iter().map(to_document).collect::<Result<Vec<_>>>()?;
    serde_json::to_string_pretty(&docs).map_err(|e| json_error(&e))
}

/// Decodes a JSON array of documents, validates each against `schema` and
/// binds every callback through `registry`.
///
/// # Errors
///
/// Malformed documents, validation failures and callback keys the registry
/// does not know.
pub fn computations_from_json(json: &str, schema: &Schema, registry: &CallbackRegistry) -> Result<ComputationSet> {
    let docs: Vec<Json> = serde_json::from_str(json).map_err(|e| json_error(&e))?;
    let mut set = ComputationSet::new();
    for doc in docs {
        let (uuid, target, computation) = from_document(doc)?;
        set.add_with_uuid(schema, uuid, target, computation)?;
    }
    set.bind(registry)?;
    Ok(set)
}

/// Encodes interactions as a JSON array.
///
/// # Errors
///
/// Returns a serialization error if an interaction cannot be encoded.
pub fn interactions_to_json(interactions: &[Interaction]) -> Result<String> {
    serde_json::to_string_pretty(interactions).map_err(|e| json_error(&e))
}

/// Decodes interactions and binds their conditions through `registry`.
///
/// # Errors
///
/// Malformed input and condition keys the registry does not know.
pub fn interactions_from_json(json: &str, registry: &CallbackRegistry) -> Result<Vec<Interaction>> {
    let mut interactions: Vec<Interaction> = serde_json::from_str(json).map_err(|e| json_error(&e))?;
    for interaction in &mut interactions {
        interaction.bind(registry)?;
    }
    Ok(interactions)
}

/// Parses a document array without binding, for inspection.
///
/// # Errors
///
/// Returns a serialization error for malformed JSON.
pub fn documents(json: &str) -> Result<Vec<Map<String, Json>>> {
    serde_json::from_str(json).map_err(|e| json_error(&e))
}

// =============================================================================
// Store snapshots
// =============================================================================

/// Serializes a store to bytes using `MessagePack` format.
///
/// Uses named serialization to preserve struct field names. Open
/// transactions are not part of the snapshot.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn to_bytes(store: &MemoryStore) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(store).map_err(|e| Error::serialization(e.to_string()))
}

/// Deserializes a store from `MessagePack` bytes.
///
/// # Errors
///
/// Returns an error if deserialization fails.
pub fn from_bytes(bytes: &[u8]) -> Result<MemoryStore> {
    rmp_serde::from_slice(bytes).map_err(|e| Error::serialization(e.to_string()))
}

/// Saves a store to a file using `MessagePack` format.
///
/// Creates the file if it doesn't exist, or overwrites it if it does.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written to,
/// or if serialization fails.
pub fn save_to_file<P: AsRef<Path>>(store: &MemoryStore, path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .map_err(|e| Error::storage(format!("failed to create file '{}': {e}", path.display())))?;

    let mut writer = BufWriter::new(file);
    let bytes = to_bytes(store)?;

    writer
        .write_all(&bytes)
        .map_err(|e| Error::storage(format!("failed to write to file '{}': {e}", path.display())))?;
    writer
        .flush()
        .map_err(|e| Error::storage(format!("failed to flush file '{}': {e}", path.display())))?;

    Ok(())
}

/// Loads a store from a `MessagePack` file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or if deserialization fails.
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<MemoryStore> {
    let path = path.as_ref();
    let file =
        File::open(path).map_err(|e| Error::storage(format!("failed to open file '{}': {e}", path.display())))?;

    let mut reader = BufReader::new(file);
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| Error::storage(format!("failed to read file '{}': {e}", path.display())))?;

    from_bytes(&bytes)
}

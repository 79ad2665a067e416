// src/store/assets.rs

//! Out-of-band storage for large values (function payloads, inputs,
//! outputs, stdout/stderr). Values live in files under the asset root and
//! are referenced by `file://` URIs; each stored asset also gets a row in
//! the `assets` table with its blake3 digest.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::params;
use serde_json::Value;
use tracing::debug;

use crate::errors::{DispatchError, Result};
use crate::store::Database;
use crate::types::NodeId;

const FILE_SCHEME: &str = "file://";

/// Metadata for one stored asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
    pub dispatch_id: String,
    pub node_id: Option<NodeId>,
    pub object_key: String,
    pub storage_path: PathBuf,
    pub digest_alg: &'static str,
    pub digest: String,
    pub size: u64,
    pub uri: String,
}

#[derive(Debug, Clone)]
pub struct AssetManager {
    root: PathBuf,
    db: Database,
}

impl AssetManager {
    pub fn new(root: impl Into<PathBuf>, db: Database) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root, db })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, dispatch_id: &str, object_key: &str) -> PathBuf {
        self.root.join(dispatch_id).join(object_key)
    }

    /// URI under which `object_key` of `dispatch_id` is (or will be) stored.
    pub fn upload_uri(&self, dispatch_id: &str, object_key: &str) -> String {
        format!("{FILE_SCHEME}{}", self.path_for(dispatch_id, object_key).display())
    }

    /// Conventional object key for a node-scoped asset.
    pub fn node_key(node_id: NodeId, name: &str) -> String {
        format!("node_{node_id}/{name}")
    }

    pub fn store_json(
        &self,
        dispatch_id: &str,
        node_id: Option<NodeId>,
        object_key: &str,
        value: &Value,
    ) -> Result<AssetRecord> {
        let bytes = serde_json::to_vec(value)?;
        self.store_bytes(dispatch_id, node_id, object_key, &bytes)
    }

    pub fn store_text(
        &self,
        dispatch_id: &str,
        node_id: Option<NodeId>,
        object_key: &str,
        text: &str,
    ) -> Result<AssetRecord> {
        self.store_bytes(dispatch_id, node_id, object_key, text.as_bytes())
    }

    fn store_bytes(
        &self,
        dispatch_id: &str,
        node_id: Option<NodeId>,
        object_key: &str,
        bytes: &[u8],
    ) -> Result<AssetRecord> {
        let path = self.path_for(dispatch_id, object_key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;

        let record = AssetRecord {
            dispatch_id: dispatch_id.to_string(),
            node_id,
            object_key: object_key.to_string(),
            digest_alg: "blake3",
            digest: blake3::hash(bytes).to_hex().to_string(),
            size: bytes.len() as u64,
            uri: format!("{FILE_SCHEME}{}", path.display()),
            storage_path: path,
        };

        self.db.conn().execute(
            "INSERT INTO assets (
                dispatch_id, node_id, object_key, storage_type, storage_path,
                digest_alg, digest, remote_uri, size
            ) VALUES (?1, ?2, ?3, 'local', ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (dispatch_id, object_key) DO UPDATE SET
                storage_path = excluded.storage_path,
                digest = excluded.digest,
                remote_uri = excluded.remote_uri,
                size = excluded.size",
            params![
                record.dispatch_id,
                record.node_id,
                record.object_key,
                record.storage_path.display().to_string(),
                record.digest_alg,
                record.digest,
                record.uri,
                record.size as i64,
            ],
        )?;

        debug!(
            dispatch_id,
            object_key,
            size = record.size,
            "stored asset"
        );
        Ok(record)
    }

    fn path_from_uri(uri: &str) -> Result<PathBuf> {
        uri.strip_prefix(FILE_SCHEME)
            .map(PathBuf::from)
            .ok_or_else(|| DispatchError::Validation(format!("unsupported asset uri '{uri}'")))
    }

    pub fn load_json(&self, uri: &str) -> Result<Value> {
        let bytes = fs::read(Self::path_from_uri(uri)?)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn load_text(&self, uri: &str) -> Result<String> {
        Ok(fs::read_to_string(Self::path_from_uri(uri)?)?)
    }

    /// Stored metadata for an asset, if any.
    pub fn record(&self, dispatch_id: &str, object_key: &str) -> Result<Option<AssetRecord>> {
        use rusqlite::OptionalExtension;

        let row = self
            .db
            .conn()
            .query_row(
                "SELECT node_id, storage_path, digest, remote_uri, size FROM assets
                 WHERE dispatch_id = ?1 AND object_key = ?2",
                params![dispatch_id, object_key],
                |row| {
                    Ok((
                        row.get::<_, Option<NodeId>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(node_id, path, digest, uri, size)| AssetRecord {
            dispatch_id: dispatch_id.to_string(),
            node_id,
            object_key: object_key.to_string(),
            storage_path: PathBuf::from(path),
            digest_alg: "blake3",
            digest: digest.unwrap_or_default(),
            size: size.max(0) as u64,
            uri,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::manifest::{LatticeMetadata, OutputExpr, WorkflowManifest};
    use crate::store::{DispatchRecord, records};

    fn manager() -> (tempfile::TempDir, AssetManager) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory().unwrap();
        let manifest = WorkflowManifest {
            name: "wf".into(),
            metadata: LatticeMetadata::default(),
            nodes: vec![],
            edges: vec![],
            output: OutputExpr::default(),
        };
        records::insert_dispatch(&db.conn(), &DispatchRecord::new("d".into(), manifest)).unwrap();
        let assets = AssetManager::new(dir.path().join("assets"), db).unwrap();
        (dir, assets)
    }

    #[test]
    fn json_assets_are_addressed_by_uri() {
        let (_dir, assets) = manager();
        let key = AssetManager::node_key(3, "output.json");
        let rec = assets
            .store_json("d", Some(3), &key, &serde_json::json!({"a": [1, 2]}))
            .unwrap();

        assert!(rec.uri.starts_with("file://"));
        assert_eq!(rec.uri, assets.upload_uri("d", &key));
        assert_eq!(
            assets.load_json(&rec.uri).unwrap(),
            serde_json::json!({"a": [1, 2]})
        );

        let stored = assets.record("d", &key).unwrap().unwrap();
        assert_eq!(stored.digest, rec.digest);
        assert_eq!(stored.node_id, Some(3));
    }

    #[test]
    fn rewriting_an_asset_updates_its_digest() {
        let (_dir, assets) = manager();
        let first = assets.store_text("d", None, "log.txt", "one").unwrap();
        let second = assets.store_text("d", None, "log.txt", "two").unwrap();
        assert_ne!(first.digest, second.digest);
        assert_eq!(assets.load_text(&second.uri).unwrap(), "two");
        assert_eq!(assets.record("d", "log.txt").unwrap().unwrap().digest, second.digest);
    }

    #[test]
    fn foreign_uris_are_rejected() {
        let (_dir, assets) = manager();
        assert!(assets.load_json("s3://bucket/key").is_err());
    }
}

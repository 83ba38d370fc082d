//! Two-way synchronizer for the tenant's Partner Directory: snapshot
//! (remote to local), deploy (local to remote) and full-sync (deploy plus
//! reconciliation of remote-only records), over single-item calls and the
//! batch codec.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::batch::{self, Operation};
use crate::client::{Method, TenantTransport};
use crate::content_type;
use crate::error::{DeployerError, Result};
use crate::properties;
use crate::report::{ParamOutcome, SyncReport};

const STRING_COLLECTION: &str = "api/v1/StringParameters";
const BINARY_COLLECTION: &str = "api/v1/BinaryParameters";
const STRING_PROPERTIES_FILE: &str = "String.properties";
const BINARY_DIR: &str = "Binary";

/// Remote string parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StringParameter {
    #[serde(rename = "Pid")]
    pub pid: String,
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Value", default)]
    pub value: String,
}

/// Remote binary parameter; `value` is base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryParameter {
    #[serde(rename = "Pid")]
    pub pid: String,
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Value", default)]
    pub value: String,
    #[serde(rename = "ContentType", default)]
    pub content_type: String,
}

#[derive(Debug, Deserialize)]
struct ODataList<T> {
    d: ODataResults<T>,
}

#[derive(Debug, Deserialize)]
struct ODataResults<T> {
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ODataSingle<T> {
    d: T,
}

/// Options shared by all sync directions.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Root of the on-disk partner layout.
    pub resources_dir: PathBuf,
    /// Optional allowlist of partner ids.
    pub pid_filter: Option<BTreeSet<String>>,
    /// Overwrite existing local files / update differing remote values.
    pub replace: bool,
    /// Delete remote records absent locally (managed partners only).
    pub full_sync: bool,
    /// Log intended transitions without mutating anything.
    pub dry_run: bool,
}

impl SyncOptions {
    fn allows(&self, pid: &str) -> bool {
        self.pid_filter
            .as_ref()
            .is_none_or(|filter| filter.contains(pid))
    }

    fn partner_dir(&self, pid: &str) -> PathBuf {
        self.resources_dir.join(pid)
    }
}

/// One local binary parameter, decoded from the on-disk layout.
#[derive(Debug, Clone)]
struct LocalBinary {
    id: String,
    bytes: Vec<u8>,
    content_type: String,
}

/// The sync engine. Holds only the transport seam.
pub struct PartnerDirectory<'a> {
    transport: &'a dyn TenantTransport,
}

impl<'a> PartnerDirectory<'a> {
    pub fn new(transport: &'a dyn TenantTransport) -> Self {
        Self { transport }
    }

    /// Remote to local: write every (allowed) remote parameter into the
    /// on-disk layout.
    pub async fn snapshot(&self, opts: &SyncOptions) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        let strings: Vec<StringParameter> = self
            .list(&format!("{STRING_COLLECTION}?$select=Pid,Id,Value"))
            .await?;
        let mut grouped: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
        for param in strings {
            if opts.allows(&param.pid) {
                grouped
                    .entry(param.pid)
                    .or_default()
                    .push((param.id, param.value));
            }
        }
        for (pid, entries) in &grouped {
            let path = opts.partner_dir(pid).join(STRING_PROPERTIES_FILE);
            let existing: BTreeSet<String> = if !opts.replace && path.exists() {
                properties::read(&path)?
                    .into_iter()
                    .map(|(key, _)| key)
                    .collect()
            } else {
                BTreeSet::new()
            };
            properties::write(&path, entries, opts.replace)?;
            for (id, _) in entries {
                if existing.contains(id) {
                    report.record(ParamOutcome::Skipped, pid, id);
                } else {
                    report.record(ParamOutcome::Created, pid, id);
                }
            }
        }

        let binaries: Vec<BinaryParameter> = self.list(BINARY_COLLECTION).await?;
        for param in binaries {
            if !opts.allows(&param.pid) {
                continue;
            }
            let binary_dir = opts.partner_dir(&param.pid).join(BINARY_DIR);
            fs::create_dir_all(&binary_dir)?;
            let filename = content_type::filename(&param.id, &param.content_type);
            let path = binary_dir.join(&filename);
            if !opts.replace && path.exists() {
                report.record(ParamOutcome::Skipped, &param.pid, &param.id);
                continue;
            }
            let bytes = BASE64.decode(param.value.as_bytes()).map_err(|err| {
                DeployerError::Protocol(format!(
                    "binary parameter {}/{} is not valid base64: {err}",
                    param.pid, param.id
                ))
            })?;
            fs::write(&path, bytes)?;
            content_type::write_sidecar(&binary_dir, &param.id, &param.content_type)?;
            report.record(ParamOutcome::Created, &param.pid, &param.id);
        }

        info!(
            created = report.created.len(),
            skipped = report.skipped.len(),
            "partner directory snapshot complete"
        );
        Ok(report)
    }

    /// Local to remote: create missing parameters, update differing ones
    /// (replace mode), and with full-sync delete remote-only records of
    /// locally managed partners.
    pub async fn deploy(&self, opts: &SyncOptions) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let pids = self.local_partner_ids(opts)?;

        let mut local_strings: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut local_binaries: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for pid in &pids {
            for (id, value) in self.local_string_params(opts, pid)? {
                local_strings.entry(pid.clone()).or_default().insert(id.clone());
                self.deploy_string(opts, pid, &id, &value, &mut report).await;
            }
            for binary in self.local_binary_params(opts, pid)? {
                local_binaries
                    .entry(pid.clone())
                    .or_default()
                    .insert(binary.id.clone());
                self.deploy_binary(opts, pid, &binary, &mut report).await;
            }
        }

        if opts.full_sync && !opts.dry_run {
            self.delete_unmanaged(&pids, &local_strings, &local_binaries, &mut report)
                .await?;
        }

        Ok(report)
    }

    /// Batch variant of [`deploy`]: existence is probed per item, then all
    /// creates/updates travel as chunked batch requests. Full-sync deletions
    /// still go through single-item deletes.
    pub async fn batch_deploy(&self, opts: &SyncOptions) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let pids = self.local_partner_ids(opts)?;

        let mut local_strings: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut local_binaries: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        let mut operations: Vec<Operation> = Vec::new();
        let mut subjects: Vec<(String, String, ParamOutcome)> = Vec::new();

        for pid in &pids {
            for (id, value) in self.local_string_params(opts, pid)? {
                local_strings.entry(pid.clone()).or_default().insert(id.clone());
                match self.probe_string(pid, &id).await {
                    Ok(Some(remote)) => {
                        if remote.value == value {
                            report.record(ParamOutcome::Unchanged, pid, &id);
                        } else if opts.replace {
                            operations.push(Operation::mutate(
                                Method::Put,
                                string_key(pid, &id),
                                format!("op-{}", operations.len() + 1),
                                serde_json::to_vec(&json!({ "Value": value }))?,
                            ));
                            subjects.push((pid.clone(), id, ParamOutcome::Updated));
                        } else {
                            report.record(ParamOutcome::Skipped, pid, &id);
                        }
                    }
                    Ok(None) => {
                        operations.push(Operation::mutate(
                            Method::Post,
                            STRING_COLLECTION,
                            format!("op-{}", operations.len() + 1),
                            serde_json::to_vec(&StringParameter {
                                pid: pid.clone(),
                                id: id.clone(),
                                value,
                            })?,
                        ));
                        subjects.push((pid.clone(), id, ParamOutcome::Created));
                    }
                    Err(err) => report.record_error(pid, &id, &err.to_string()),
                }
            }
            for binary in self.local_binary_params(opts, pid)? {
                local_binaries
                    .entry(pid.clone())
                    .or_default()
                    .insert(binary.id.clone());
                let encoded = BASE64.encode(&binary.bytes);
                match self.probe_binary(pid, &binary.id).await {
                    Ok(Some(remote)) => {
                        let remote_bytes = BASE64.decode(remote.value.as_bytes()).unwrap_or_default();
                        if remote_bytes == binary.bytes && remote.content_type == binary.content_type
                        {
                            report.record(ParamOutcome::Unchanged, pid, &binary.id);
                        } else if opts.replace {
                            operations.push(Operation::mutate(
                                Method::Put,
                                binary_key(pid, &binary.id),
                                format!("op-{}", operations.len() + 1),
                                serde_json::to_vec(&json!({
                                    "Value": encoded,
                                    "ContentType": binary.content_type,
                                }))?,
                            ));
                            subjects.push((pid.clone(), binary.id.clone(), ParamOutcome::Updated));
                        } else {
                            report.record(ParamOutcome::Skipped, pid, &binary.id);
                        }
                    }
                    Ok(None) => {
                        operations.push(Operation::mutate(
                            Method::Post,
                            BINARY_COLLECTION,
                            format!("op-{}", operations.len() + 1),
                            serde_json::to_vec(&BinaryParameter {
                                pid: pid.clone(),
                                id: binary.id.clone(),
                                value: encoded,
                                content_type: binary.content_type.clone(),
                            })?,
                        ));
                        subjects.push((pid.clone(), binary.id.clone(), ParamOutcome::Created));
                    }
                    Err(err) => report.record_error(pid, &binary.id, &err.to_string()),
                }
            }
        }

        if opts.dry_run {
            for (pid, id, outcome) in &subjects {
                info!(%pid, %id, ?outcome, "dry-run: would submit batch operation");
                report.record(*outcome, pid, id);
            }
            return Ok(report);
        }

        if !operations.is_empty() {
            let responses = batch::execute_chunked(self.transport, &operations).await?;
            for (index, response) in responses.iter().enumerate() {
                let Some((pid, id, _)) = subjects.get(index) else {
                    warn!(index, "batch returned more responses than operations");
                    break;
                };
                if let Some(error) = &response.error {
                    report.record_error(pid, id, error);
                } else if response.status == 201 {
                    report.record(ParamOutcome::Created, pid, id);
                } else if (200..300).contains(&response.status) {
                    report.record(ParamOutcome::Updated, pid, id);
                } else {
                    report.record_error(
                        pid,
                        id,
                        &format!("HTTP {}: {}", response.status, response.body_text()),
                    );
                }
            }
        }

        if opts.full_sync {
            self.delete_unmanaged(&pids, &local_strings, &local_binaries, &mut report)
                .await?;
        }
        Ok(report)
    }

    async fn deploy_string(
        &self,
        opts: &SyncOptions,
        pid: &str,
        id: &str,
        value: &str,
        report: &mut SyncReport,
    ) {
        match self.probe_string(pid, id).await {
            Ok(Some(remote)) => {
                if remote.value == value {
                    report.record(ParamOutcome::Unchanged, pid, id);
                } else if !opts.replace {
                    report.record(ParamOutcome::Skipped, pid, id);
                } else if opts.dry_run {
                    info!(pid, id, "dry-run: would update string parameter");
                    report.record(ParamOutcome::Updated, pid, id);
                } else {
                    let body = json!({ "Value": value });
                    match self.mutate_json(Method::Put, &string_key(pid, id), &body).await {
                        Ok(()) => report.record(ParamOutcome::Updated, pid, id),
                        Err(err) => report.record_error(pid, id, &err.to_string()),
                    }
                }
            }
            Ok(None) => {
                if opts.dry_run {
                    info!(pid, id, "dry-run: would create string parameter");
                    report.record(ParamOutcome::Created, pid, id);
                    return;
                }
                let body = json!({ "Pid": pid, "Id": id, "Value": value });
                match self.mutate_json(Method::Post, STRING_COLLECTION, &body).await {
                    Ok(()) => report.record(ParamOutcome::Created, pid, id),
                    Err(err) => report.record_error(pid, id, &err.to_string()),
                }
            }
            Err(err) => report.record_error(pid, id, &err.to_string()),
        }
    }

    async fn deploy_binary(
        &self,
        opts: &SyncOptions,
        pid: &str,
        binary: &LocalBinary,
        report: &mut SyncReport,
    ) {
        let id = &binary.id;
        match self.probe_binary(pid, id).await {
            Ok(Some(remote)) => {
                let remote_bytes = BASE64.decode(remote.value.as_bytes()).unwrap_or_default();
                if remote_bytes == binary.bytes && remote.content_type == binary.content_type {
                    report.record(ParamOutcome::Unchanged, pid, id);
                } else if !opts.replace {
                    report.record(ParamOutcome::Skipped, pid, id);
                } else if opts.dry_run {
                    info!(pid, id, "dry-run: would update binary parameter");
                    report.record(ParamOutcome::Updated, pid, id);
                } else {
                    let body = json!({
                        "Value": BASE64.encode(&binary.bytes),
                        "ContentType": binary.content_type,
                    });
                    match self.mutate_json(Method::Put, &binary_key(pid, id), &body).await {
                        Ok(()) => report.record(ParamOutcome::Updated, pid, id),
                        Err(err) => report.record_error(pid, id, &err.to_string()),
                    }
                }
            }
            Ok(None) => {
                if opts.dry_run {
                    info!(pid, id, "dry-run: would create binary parameter");
                    report.record(ParamOutcome::Created, pid, id);
                    return;
                }
                let body = json!({
                    "Pid": pid,
                    "Id": id,
                    "Value": BASE64.encode(&binary.bytes),
                    "ContentType": binary.content_type,
                });
                match self.mutate_json(Method::Post, BINARY_COLLECTION, &body).await {
                    Ok(()) => report.record(ParamOutcome::Created, pid, id),
                    Err(err) => report.record_error(pid, id, &err.to_string()),
                }
            }
            Err(err) => report.record_error(pid, id, &err.to_string()),
        }
    }

    /// Delete remote records absent locally, restricted to partner ids that
    /// exist on disk. Partners without a local directory are never touched.
    async fn delete_unmanaged(
        &self,
        managed: &[String],
        local_strings: &BTreeMap<String, BTreeSet<String>>,
        local_binaries: &BTreeMap<String, BTreeSet<String>>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let managed: BTreeSet<&String> = managed.iter().collect();

        let strings: Vec<StringParameter> = self
            .list(&format!("{STRING_COLLECTION}?$select=Pid,Id,Value"))
            .await?;
        for param in strings {
            if !managed.contains(&param.pid) {
                continue;
            }
            let known = local_strings
                .get(&param.pid)
                .is_some_and(|ids| ids.contains(&param.id));
            if known {
                continue;
            }
            match self.delete(&string_key(&param.pid, &param.id)).await {
                Ok(()) => report.record(ParamOutcome::Deleted, &param.pid, &param.id),
                Err(err) => report.record_error(&param.pid, &param.id, &err.to_string()),
            }
        }

        let binaries: Vec<BinaryParameter> = self.list(BINARY_COLLECTION).await?;
        for param in binaries {
            if !managed.contains(&param.pid) {
                continue;
            }
            let known = local_binaries
                .get(&param.pid)
                .is_some_and(|ids| ids.contains(&param.id));
            if known {
                continue;
            }
            match self.delete(&binary_key(&param.pid, &param.id)).await {
                Ok(()) => report.record(ParamOutcome::Deleted, &param.pid, &param.id),
                Err(err) => report.record_error(&param.pid, &param.id, &err.to_string()),
            }
        }
        Ok(())
    }

    /// Partner ids are the subdirectory names of the resources root, sorted
    /// ascending, optionally narrowed by the filter.
    fn local_partner_ids(&self, opts: &SyncOptions) -> Result<Vec<String>> {
        if !opts.resources_dir.is_dir() {
            return Err(DeployerError::NotFound(format!(
                "partner directory root {} does not exist",
                opts.resources_dir.display()
            )));
        }
        let mut pids = Vec::new();
        for entry in fs::read_dir(&opts.resources_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if opts.allows(&name) {
                pids.push(name);
            }
        }
        pids.sort();
        Ok(pids)
    }

    fn local_string_params(&self, opts: &SyncOptions, pid: &str) -> Result<Vec<(String, String)>> {
        let path = opts.partner_dir(pid).join(STRING_PROPERTIES_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        properties::read(&path)
    }

    /// Read local binary parameters. With several files sharing a stem only
    /// the first (directory-listing order) is used; the rest are warned.
    fn local_binary_params(&self, opts: &SyncOptions, pid: &str) -> Result<Vec<LocalBinary>> {
        let binary_dir = opts.partner_dir(pid).join(BINARY_DIR);
        if !binary_dir.is_dir() {
            return Ok(Vec::new());
        }
        let sidecar = content_type::read_sidecar(&binary_dir)?;
        let mut seen: HashSet<String> = HashSet::new();
        let mut params = Vec::new();

        for entry in fs::read_dir(&binary_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let filename = entry.file_name().to_string_lossy().to_string();
            if filename == content_type::SIDECAR_FILE {
                continue;
            }
            let path = entry.path();
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| filename.clone());
            if !seen.insert(stem.clone()) {
                warn!(pid, %filename, "duplicate binary parameter stem; skipping");
                continue;
            }
            let extension = path
                .extension()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "bin".to_string());
            let content_type = sidecar
                .get(&filename)
                .cloned()
                .unwrap_or(extension);
            let bytes = fs::read(&path)?;
            debug!(pid, id = %stem, %content_type, "read local binary parameter");
            params.push(LocalBinary {
                id: stem,
                bytes,
                content_type,
            });
        }
        Ok(params)
    }

    async fn list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let response = self
            .transport
            .request(
                Method::Get,
                path,
                &[("Accept".to_string(), "application/json".to_string())],
                None,
            )
            .await?;
        if !response.is_success() {
            return Err(DeployerError::from_status(
                response.status,
                format!("listing {path} failed: {}", response.body_text()),
            ));
        }
        let parsed: ODataList<T> = serde_json::from_slice(&response.body)?;
        Ok(parsed.d.results)
    }

    async fn probe_string(&self, pid: &str, id: &str) -> Result<Option<StringParameter>> {
        self.probe(&string_key(pid, id)).await
    }

    async fn probe_binary(&self, pid: &str, id: &str) -> Result<Option<BinaryParameter>> {
        self.probe(&binary_key(pid, id)).await
    }

    async fn probe<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let response = self
            .transport
            .request(
                Method::Get,
                path,
                &[("Accept".to_string(), "application/json".to_string())],
                None,
            )
            .await?;
        match response.status {
            200 => {
                let parsed: ODataSingle<T> = serde_json::from_slice(&response.body)?;
                Ok(Some(parsed.d))
            }
            404 => Ok(None),
            status => Err(DeployerError::from_status(
                status,
                format!("probe of {path} failed: {}", response.body_text()),
            )),
        }
    }

    async fn mutate_json(
        &self,
        method: Method,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<()> {
        let response = self
            .transport
            .request(
                method,
                path,
                &[("Content-Type".to_string(), "application/json".to_string())],
                Some(serde_json::to_vec(body)?),
            )
            .await?;
        if !response.is_success() {
            return Err(DeployerError::from_status(
                response.status,
                format!("{method} {path} failed: {}", response.body_text()),
            ));
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let response = self
            .transport
            .request(Method::Delete, path, &[], None)
            .await?;
        if !response.is_success() {
            return Err(DeployerError::from_status(
                response.status,
                format!("DELETE {path} failed: {}", response.body_text()),
            ));
        }
        Ok(())
    }
}

fn string_key(pid: &str, id: &str) -> String {
    format!(
        "{STRING_COLLECTION}(Pid='{}',Id='{}')",
        quote_key(pid),
        quote_key(id)
    )
}

fn binary_key(pid: &str, id: &str) -> String {
    format!(
        "{BINARY_COLLECTION}(Pid='{}',Id='{}')",
        quote_key(pid),
        quote_key(id)
    )
}

/// Single quotes inside key predicates are doubled.
fn quote_key(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_predicates_escape_quotes() {
        assert_eq!(
            string_key("P1", "it's"),
            "api/v1/StringParameters(Pid='P1',Id='it''s')"
        );
        assert_eq!(
            binary_key("P'1", "b"),
            "api/v1/BinaryParameters(Pid='P''1',Id='b')"
        );
    }

    #[test]
    fn filter_allows_all_when_absent() {
        let opts = SyncOptions {
            resources_dir: PathBuf::from("."),
            pid_filter: None,
            replace: true,
            full_sync: false,
            dry_run: false,
        };
        assert!(opts.allows("anything"));

        let filtered = SyncOptions {
            pid_filter: Some(["P1".to_string()].into_iter().collect()),
            ..opts
        };
        assert!(filtered.allows("P1"));
        assert!(!filtered.allows("P2"));
    }
}

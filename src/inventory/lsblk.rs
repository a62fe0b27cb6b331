//! Device source that reads `lsblk --json` output.
//!
//! Only devices of type `disk` become inventory disks. A LUKS partition shows
//! up with `fstype: crypto_LUKS`; when it has already been opened lsblk lists a
//! `crypt` child whose fstype is the inner filesystem.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::process::Command;
use std::str::FromStr;

use super::{DeviceSource, Disk, EncryptionStatus, Partition};
use crate::types::Filesystem;

const LSBLK_COLUMNS: &str = "NAME,SIZE,TYPE,FSTYPE,LABEL,PARTTYPENAME";

/// Enumerates host disks with `lsblk`.
#[derive(Debug, Clone, Default)]
pub struct LsblkSource;

impl LsblkSource {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceSource for LsblkSource {
    fn enumerate(&self) -> Result<Vec<Disk>> {
        let output = Command::new("lsblk")
            .args(["--json", "--bytes", "--output", LSBLK_COLUMNS])
            .output()
            .context("Failed to run lsblk")?;

        if !output.status.success() {
            bail!(
                "lsblk exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        parse_lsblk_json(&String::from_utf8_lossy(&output.stdout))
    }
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

/// Older lsblk releases print sizes as strings even with `--bytes`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LsblkSize {
    Number(u64),
    Text(String),
}

impl LsblkSize {
    fn bytes(&self) -> Result<u64> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Text(s) => s
                .trim()
                .parse()
                .with_context(|| format!("Invalid lsblk size '{}'", s)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    size: LsblkSize,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    fstype: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    parttypename: Option<String>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

/// Parse the JSON printed by `lsblk --json --bytes`.
pub fn parse_lsblk_json(json: &str) -> Result<Vec<Disk>> {
    let output: LsblkOutput =
        serde_json::from_str(json).context("Failed to parse lsblk JSON output")?;

    let mut disks = Vec::new();
    for device in output.blockdevices.iter().filter(|d| d.kind == "disk") {
        let mut partitions = Vec::new();
        for (i, child) in device.children.iter().filter(|c| c.kind == "part").enumerate() {
            partitions.push(to_partition(&device.name, i as u32 + 1, child)?);
        }
        disks.push(Disk {
            name: device.name.clone(),
            size: device.size.bytes()?,
            partitions,
        });
    }
    Ok(disks)
}

fn to_partition(disk: &str, position: u32, dev: &LsblkDevice) -> Result<Partition> {
    let index = trailing_number(&dev.name).unwrap_or(position);
    let is_luks = dev.fstype.as_deref() == Some("crypto_LUKS");

    let (filesystem, encryption) = if is_luks {
        match dev.children.iter().find(|c| c.kind == "crypt") {
            Some(opened) => (
                opened.fstype.as_deref().and_then(parse_fstype),
                EncryptionStatus::LuksUnlocked,
            ),
            None => (None, EncryptionStatus::LuksLocked),
        }
    } else if dev.parttypename.as_deref() == Some("BIOS boot") {
        (Some(Filesystem::BiosBoot), EncryptionStatus::Plain)
    } else {
        (dev.fstype.as_deref().and_then(parse_fstype), EncryptionStatus::Plain)
    };

    Ok(Partition {
        name: dev.name.clone(),
        disk: disk.to_string(),
        index,
        size: dev.size.bytes()?,
        label: dev.label.clone(),
        filesystem,
        encryption,
    })
}

fn parse_fstype(fstype: &str) -> Option<Filesystem> {
    match Filesystem::from_str(fstype) {
        Ok(fs) => Some(fs),
        Err(_) => {
            tracing::debug!("Ignoring unsupported filesystem type '{}'", fstype);
            None
        }
    }
}

fn trailing_number(name: &str) -> Option<u32> {
    let digits: String = name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
      "blockdevices": [
        {"name": "loop0", "size": 838860800, "type": "loop", "fstype": "squashfs"},
        {"name": "vda", "size": 16106127360, "type": "disk", "fstype": null,
         "children": [
           {"name": "vda1", "size": 1048576, "type": "part", "fstype": null,
            "parttypename": "BIOS boot"},
           {"name": "vda2", "size": 1073741824, "type": "part", "fstype": "ext4", "label": "boot"},
           {"name": "vda3", "size": "5368709120", "type": "part", "fstype": "crypto_LUKS"},
           {"name": "vda4", "size": 4294967296, "type": "part", "fstype": "crypto_LUKS",
            "children": [
              {"name": "luks-1234", "size": 4278190080, "type": "crypt", "fstype": "btrfs"}
            ]}
         ]},
        {"name": "sr0", "size": 1073741312, "type": "rom", "fstype": "iso9660"}
      ]
    }"#;

    #[test]
    fn test_only_disks_are_listed() {
        let disks = parse_lsblk_json(SAMPLE).expect("parse");
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].name, "vda");
        assert_eq!(disks[0].size, 16_106_127_360);
        assert_eq!(disks[0].partitions.len(), 4);
    }

    #[test]
    fn test_partition_details() {
        let disks = parse_lsblk_json(SAMPLE).expect("parse");
        let parts = &disks[0].partitions;

        assert_eq!(parts[0].filesystem, Some(Filesystem::BiosBoot));
        assert_eq!(parts[1].filesystem, Some(Filesystem::Ext4));
        assert_eq!(parts[1].label.as_deref(), Some("boot"));
        assert_eq!(parts[2].size, 5_368_709_120);
        assert!(parts[2].is_locked());
        assert_eq!(parts[3].encryption, EncryptionStatus::LuksUnlocked);
        assert_eq!(parts[3].filesystem, Some(Filesystem::Btrfs));
        assert_eq!(parts[3].index, 4);
        assert_eq!(parts[3].disk, "vda");
    }

    #[test]
    fn test_nvme_index_from_name() {
        assert_eq!(trailing_number("nvme0n1p3"), Some(3));
        assert_eq!(trailing_number("vda"), None);
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(parse_lsblk_json("not json").is_err());
        assert!(parse_lsblk_json(r#"{"blockdevices": [{"name": "vda", "size": "big", "type": "disk"}]}"#).is_err());
    }
}

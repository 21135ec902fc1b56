//! Variable descriptor table and last-observed raw values.
//!
//! The registry is plain storage: the descriptor table arrives from the
//! device (or a config file) and raw values are overwritten as memory
//! read responses come in. Decoding raw bytes against a descriptor is a
//! presentation concern and stays out of here.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Element type of a device variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl VarType {
    pub fn size_bytes(&self) -> usize {
        match self {
            VarType::I8 | VarType::U8 => 1,
            VarType::I16 | VarType::U16 => 2,
            VarType::I32 | VarType::U32 | VarType::F32 => 4,
            VarType::F64 => 8,
        }
    }
}

/// One entry of the device variable table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    pub name: String,
    pub address: u32,
    #[serde(rename = "type")]
    pub var_type: VarType,
    #[serde(default = "default_array_size")]
    pub array_size: u32,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub unit: String,
}

fn default_array_size() -> u32 {
    1
}

fn default_scale() -> f64 {
    1.0
}

/// One memory read in a `ReadMemBatch` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRequest {
    pub addr: u32,
    pub size: u16,
}

#[derive(Default)]
struct RegistryInner {
    descriptors: Vec<VariableDescriptor>,
    raw_values: HashMap<u32, Vec<u8>>,
}

/// Shared variable store. Writers replace whole values, so a concurrent
/// reader observes either the prior or the new bytes, never a mix.
#[derive(Default)]
pub struct VariableRegistry {
    inner: RwLock<RegistryInner>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_descriptors(&self, descriptors: Vec<VariableDescriptor>) {
        self.inner.write().descriptors = descriptors;
    }

    pub fn descriptors(&self) -> Vec<VariableDescriptor> {
        self.inner.read().descriptors.clone()
    }

    pub fn descriptor_count(&self) -> usize {
        self.inner.read().descriptors.len()
    }

    /// Record the latest raw bytes observed at `address`. Last write
    /// wins.
    pub fn update_raw(&self, address: u32, raw: Vec<u8>) {
        self.inner.write().raw_values.insert(address, raw);
    }

    pub fn raw_value(&self, address: u32) -> Option<Vec<u8>> {
        self.inner.read().raw_values.get(&address).cloned()
    }

    /// Apply every record of a `ReadMemBatch` response payload; returns
    /// the number of values updated.
    pub fn apply_mem_batch(&self, payload: &[u8]) -> usize {
        let records = decode_mem_batch_response(payload);
        let applied = records.len();
        let mut inner = self.inner.write();
        for (addr, raw) in records {
            inner.raw_values.insert(addr, raw);
        }
        applied
    }
}

/// Encode a `ReadMemBatch` request payload: `u32 addr LE | u16 size LE`
/// per entry.
pub fn encode_mem_batch_request(requests: &[MemoryRequest]) -> Vec<u8> {
    let mut out = Vec::with_capacity(requests.len() * 6);
    for request in requests {
        out.extend_from_slice(&request.addr.to_le_bytes());
        out.extend_from_slice(&request.size.to_le_bytes());
    }
    out
}

/// Decode a `ReadMemBatch` response payload: `u32 addr LE | u16 len LE |
/// len bytes` per record. A truncated trailing record is dropped.
pub fn decode_mem_batch_response(payload: &[u8]) -> Vec<(u32, Vec<u8>)> {
    let mut records = Vec::new();
    let mut offset = 0;
    while payload.len() - offset >= 6 {
        let addr = u32::from_le_bytes(payload[offset..offset + 4].try_into().unwrap());
        let len = u16::from_le_bytes([payload[offset + 4], payload[offset + 5]]) as usize;
        offset += 6;
        if payload.len() - offset < len {
            break;
        }
        records.push((addr, payload[offset..offset + len].to_vec()));
        offset += len;
    }
    records
}

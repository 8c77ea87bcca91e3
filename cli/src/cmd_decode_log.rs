//! `carbonwatch decode-log`: offline decode of one raw log.

use std::path::Path;

use alloy_primitives::{Address, Bytes, B256};
use anyhow::{anyhow, bail, Context};
use carbonwatch_core::{DecodedEvent, EventCatalog, RawLogRecord};
use carbonwatch_evm::{topic_hash, ContractInterface, EvmDecoder};

use crate::CmdResult;

pub fn run(topics: &[String], data: &str, as_json: bool, abi: Option<&Path>) -> CmdResult {
    let catalog = EventCatalog::carbon_credit();
    if let Some(path) = abi {
        let interface = ContractInterface::from_path(path)
            .with_context(|| format!("loading ABI from {}", path.display()))?;
        for descriptor in &catalog {
            interface.check(descriptor)?;
        }
    }

    let decoded = decode(&catalog, topics, data)?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&decoded)?);
    } else {
        println!("{decoded}");
    }
    Ok(())
}

fn decode(catalog: &EventCatalog, topics: &[String], data: &str) -> anyhow::Result<DecodedEvent> {
    if topics.is_empty() {
        bail!("at least one topic (the event signature hash) is required");
    }
    let topics = topics
        .iter()
        .map(|t| t.parse::<B256>().with_context(|| format!("invalid topic '{t}'")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let data = hex::decode(data.strip_prefix("0x").unwrap_or(data)).context("invalid data hex")?;

    let raw = RawLogRecord {
        address: Address::ZERO,
        topics,
        data: Bytes::from(data),
        transaction_hash: B256::ZERO,
        block_number: 0,
        log_index: 0,
        removed: false,
    };

    let signature = raw.topics[0];
    let descriptor = catalog
        .iter()
        .find(|d| topic_hash(d) == signature)
        .ok_or_else(|| anyhow!("no catalog event has topic0 {signature}"))?;

    Ok(EvmDecoder::new().decode(&raw, descriptor)?)
}

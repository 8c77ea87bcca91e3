//! `carbonwatch catalog`: the events this tool understands.

use std::path::Path;

use anyhow::Context;
use carbonwatch_core::EventCatalog;
use carbonwatch_evm::{topic_hash, ContractInterface};

use crate::CmdResult;

pub fn run(abi: Option<&Path>) -> CmdResult {
    let interface = abi
        .map(|path| {
            ContractInterface::from_path(path)
                .with_context(|| format!("loading ABI from {}", path.display()))
        })
        .transpose()?;

    for line in render(&EventCatalog::carbon_credit(), interface.as_ref()) {
        println!("{line}");
    }
    Ok(())
}

/// `Name  signature  0xtopic` per descriptor, plus the ABI verdict when an
/// interface is given.
fn render(catalog: &EventCatalog, interface: Option<&ContractInterface>) -> Vec<String> {
    catalog
        .iter()
        .map(|descriptor| {
            let mut line = format!(
                "{:<16} {:<40} 0x{}",
                descriptor.name,
                descriptor.signature(),
                hex::encode(topic_hash(descriptor))
            );
            if let Some(interface) = interface {
                match interface.check(descriptor) {
                    Ok(()) => line.push_str("  abi: ok"),
                    Err(e) => line.push_str(&format!("  abi: {e}")),
                }
            }
            line
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_signatures_with_topic_hashes() {
        let lines = render(&EventCatalog::carbon_credit(), None);
        assert_eq!(lines.len(), 3);
        let issued = lines.iter().find(|l| l.starts_with("CreditsIssued")).unwrap();
        assert!(issued.contains("CreditsIssued(address,uint256)"));
        assert!(issued
            .ends_with("0xba27001eed39081e9d6f521103bc201676a9b4eb7fe868e5e596da78b135126b"));
    }

    #[test]
    fn reports_abi_mismatches() {
        let abi = r#"[{"type":"event","name":"CreditsIssued","anonymous":false,"inputs":[
            {"name":"to","type":"address","indexed":true},
            {"name":"amount","type":"uint256","indexed":false}]}]"#;
        let interface = ContractInterface::from_json_str(abi).unwrap();
        let lines = render(&EventCatalog::carbon_credit(), Some(&interface));
        assert!(lines.iter().any(|l| l.starts_with("CreditsIssued") && l.ends_with("abi: ok")));
        assert!(lines
            .iter()
            .any(|l| l.starts_with("CreditsRetired") && l.contains("not declared")));
    }
}

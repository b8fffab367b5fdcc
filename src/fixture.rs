use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::{
    common::{address::Address, word::Word},
    journal::{BaseAccount, World},
    message::{CallKind, Message},
};

/// A state-test style fixture: one transaction template whose `data`,
/// `gasLimit` and `value` arrays expand into the instance batch, plus an
/// optional `pre` section seeding the base world.
#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    pub transaction: TransactionFixture,
    #[serde(default)]
    pub pre: HashMap<String, AccountFixture>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFixture {
    pub sender: String,
    #[serde(default)]
    pub to: String,
    pub nonce: String,
    pub gas_price: String,
    pub data: Vec<String>,
    pub gas_limit: Vec<String>,
    pub value: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountFixture {
    pub balance: Option<String>,
    pub nonce: Option<String>,
    pub code: Option<String>,
    pub storage: Option<HashMap<String, String>>,
}

impl Fixture {
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&source)?)
    }

    /// Builds the shared base world from the `pre` section.
    pub fn world(&self) -> eyre::Result<World> {
        let mut world = World::new();
        for (address, account) in &self.pre {
            let address = Address::try_from(address.as_str())
                .map_err(|e| eyre::eyre!("bad pre address '{address}': {e}"))?;
            let mut storage = HashMap::new();
            if let Some(slots) = &account.storage {
                for (key, value) in slots {
                    storage.insert(Word::from_hex(key)?, Word::from_hex(value)?);
                }
            }
            world.insert(
                address,
                BaseAccount {
                    balance: parse_word_or_zero(account.balance.as_deref())?,
                    nonce: parse_word_or_zero(account.nonce.as_deref())?,
                    code: parse_bytes(account.code.as_deref().unwrap_or(""))?,
                    storage,
                },
            );
        }
        Ok(world)
    }

    /// Expands the cartesian `data` x `gasLimit` x `value` product into
    /// one message per instance: outer loop `data`, then `gasLimit`, then
    /// `value`. An empty `to` makes every instance a CREATE.
    pub fn messages(&self) -> eyre::Result<Vec<Message>> {
        let tx = &self.transaction;
        let sender = Address::try_from(tx.sender.as_str())
            .map_err(|e| eyre::eyre!("bad sender: {e}"))?;
        let (to, kind) = if tx.to.is_empty() {
            (Address::zero(), CallKind::Create)
        } else {
            (
                Address::try_from(tx.to.as_str()).map_err(|e| eyre::eyre!("bad to: {e}"))?,
                CallKind::Call,
            )
        };
        let gas_price = Word::from_hex(&tx.gas_price)?;

        let data_s = tx
            .data
            .iter()
            .map(|item| parse_bytes(item))
            .collect::<eyre::Result<Vec<_>>>()?;
        let gas_limit_s = tx
            .gas_limit
            .iter()
            .map(|item| Ok(Word::from_hex(item)?.as_u64()))
            .collect::<eyre::Result<Vec<_>>>()?;
        let value_s = tx
            .value
            .iter()
            .map(|item| Word::from_hex(item))
            .collect::<eyre::Result<Vec<_>>>()?;

        let mut messages =
            Vec::with_capacity(data_s.len() * gas_limit_s.len() * value_s.len());
        for data in &data_s {
            for gas_limit in &gas_limit_s {
                for value in &value_s {
                    messages.push(Message {
                        caller: sender,
                        to,
                        value: *value,
                        data: data.clone(),
                        gas_limit: *gas_limit,
                        depth: 0,
                        kind,
                        is_static: false,
                        origin: sender,
                        gas_price,
                    });
                }
            }
        }
        Ok(messages)
    }
}

fn parse_word_or_zero(value: Option<&str>) -> eyre::Result<Word> {
    match value {
        Some(hex) if !hex.is_empty() => Word::from_hex(hex),
        _ => Ok(Word::zero()),
    }
}

fn parse_bytes(hex: &str) -> eyre::Result<Vec<u8>> {
    let hex = hex.trim_start_matches("0x");
    if hex.is_empty() {
        return Ok(Vec::new());
    }
    Ok(hex::decode(hex)?)
}

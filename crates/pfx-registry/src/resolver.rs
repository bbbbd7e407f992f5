//! Symbol-to-account resolution from the pythd product list.

use crate::error::{RegistryError, RegistryResult};
use pfx_core::OracleAccount;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

const GENERIC_SYMBOL: &str = "generic_symbol";

/// Raw product entry from `get_product_list`.
#[derive(Debug, Deserialize)]
pub struct RawProduct {
    /// Product account address.
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub attr_dict: HashMap<String, String>,
    #[serde(default)]
    pub price: Vec<RawPriceAccount>,
}

/// Raw price account entry of a product.
#[derive(Debug, Deserialize)]
pub struct RawPriceAccount {
    #[serde(default)]
    pub account: String,
    /// pythd omits a zero exponent.
    #[serde(default)]
    pub price_exponent: i32,
    #[serde(default)]
    pub price_type: Option<String>,
}

/// Price accounts per generic symbol. Built once, read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountTable {
    accounts: HashMap<String, Vec<OracleAccount>>,
}

impl AccountTable {
    pub fn get(&self, symbol: &str) -> Option<&[OracleAccount]> {
        self.accounts.get(symbol).map(Vec::as_slice)
    }

    /// Resolved symbols, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.accounts.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Number of accounts across all symbols.
    pub fn account_count(&self) -> usize {
        self.accounts.values().map(Vec::len).sum()
    }

    /// Every account, in symbol order.
    pub fn all_accounts(&self) -> Vec<&OracleAccount> {
        let mut symbols: Vec<&String> = self.accounts.keys().collect();
        symbols.sort();
        symbols
            .into_iter()
            .flat_map(|s| self.accounts[s].iter())
            .collect()
    }
}

impl FromIterator<(String, Vec<OracleAccount>)> for AccountTable {
    /// Later entries for a symbol replace earlier ones; symbols left without
    /// accounts are dropped.
    fn from_iter<I: IntoIterator<Item = (String, Vec<OracleAccount>)>>(iter: I) -> Self {
        let mut accounts: HashMap<String, Vec<OracleAccount>> = iter.into_iter().collect();
        accounts.retain(|_, list| !list.is_empty());
        Self { accounts }
    }
}

/// Build the account table from a `get_product_list` result.
///
/// - the result must be an array of products, otherwise resolution fails
/// - products without a generic symbol are skipped
/// - price entries without an account address are skipped
/// - when products share a generic symbol, the last one in the list wins
pub fn resolve(product_list: &Value) -> RegistryResult<AccountTable> {
    if !product_list.is_array() {
        return Err(RegistryError::Resolution(format!(
            "expected product array, got {}",
            json_kind(product_list)
        )));
    }

    let products: Vec<RawProduct> = serde_json::from_value(product_list.clone())
        .map_err(|e| RegistryError::Resolution(e.to_string()))?;

    let total = products.len();
    let mut skipped = 0usize;
    let mut entries = Vec::with_capacity(total);

    for product in products {
        let symbol = match product.attr_dict.get(GENERIC_SYMBOL) {
            Some(s) if !s.is_empty() => s.clone(),
            _ => {
                debug!(product = %product.account, "Product without generic_symbol skipped");
                skipped += 1;
                continue;
            }
        };

        let mut accounts = Vec::with_capacity(product.price.len());
        for price in product.price {
            if price.account.is_empty() {
                debug!(symbol = %symbol, "Price entry without account skipped");
                continue;
            }
            accounts.push(OracleAccount::new(price.account, price.price_exponent));
        }
        entries.push((symbol, accounts));
    }

    let table: AccountTable = entries.into_iter().collect();
    info!(
        products = total,
        skipped,
        symbols = table.len(),
        accounts = table.account_count(),
        "Resolved oracle accounts"
    );
    Ok(table)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn product_list() -> Value {
        json!([
            {
                "account": "3m1y5h2uv7EQL3KaJZehvAJa4yDNvgc5yAdL9KPMKwvk",
                "attr_dict": {
                    "asset_type": "Metal",
                    "symbol": "Metal.XAU/USD",
                    "generic_symbol": "XAUUSD"
                },
                "price": [
                    {"account": "XAUstale11111111111111111111111111111111111", "price_exponent": -2}
                ]
            },
            {
                "account": "GVXRSBjFk6e6J3NbVPXohDJetcTjaeeuykUpbQF8UoMU",
                "attr_dict": {"symbol": "Crypto.BTC/USD", "generic_symbol": "BTCUSD"},
                "price": [
                    {"account": "HovQMDrbAgAYPCmHVSrezcSmkMtXSSUsLDFANExrZh2J", "price_exponent": -8},
                    {"account": "", "price_exponent": -8},
                    {"account": "GEmzzL6xabxwCZXvKLLr5ihbUrv6Awwrij3vKoDdxBsj"}
                ]
            },
            {
                "account": "no-symbol-product",
                "attr_dict": {"symbol": "FX.EUR/USD"},
                "price": [{"account": "Fu76ChamBDjE8UuGLV6GP2AcPPSU6gjhkNhAyuoPm7ny", "price_exponent": -5}]
            },
            {
                "account": "second-xau-product",
                "attr_dict": {"generic_symbol": "XAUUSD"},
                "price": [
                    {"account": "8y3WWjvmSmVGWVKH1rCA7VTRmuU7QbJ9axafSsBX5FcD", "price_exponent": -5, "price_type": "price"},
                    {"account": "XAUsecondary1111111111111111111111111111111", "price_exponent": -3}
                ]
            },
            {
                "account": "empty-prices",
                "attr_dict": {"generic_symbol": "XAGUSD"},
                "price": [{"account": ""}]
            }
        ])
    }

    #[test]
    fn test_resolve_product_list() {
        let table = resolve(&product_list()).unwrap();

        assert_eq!(table.symbols(), vec!["BTCUSD", "XAUUSD"]);
        assert_eq!(table.account_count(), 4);

        let xau = table.get("XAUUSD").unwrap();
        assert_eq!(xau.len(), 2);
        assert_eq!(xau[0].address, "8y3WWjvmSmVGWVKH1rCA7VTRmuU7QbJ9axafSsBX5FcD");
        assert_eq!(xau[0].exponent, -5);
        assert_eq!(xau[1].exponent, -3);
        assert!(xau.iter().all(|a| !a.address.starts_with("XAUstale")));
    }

    #[test]
    fn test_duplicate_symbol_last_product_wins() {
        let list = json!([
            {"attr_dict": {"generic_symbol": "XAUUSD"}, "price": [{"account": "old", "price_exponent": -5}]},
            {"attr_dict": {"generic_symbol": "XAUUSD"}, "price": [{"account": "new", "price_exponent": -5}]},
            {"attr_dict": {"generic_symbol": "XAGUSD"}, "price": [{"account": "xag", "price_exponent": -5}]},
            {"attr_dict": {"generic_symbol": "XAGUSD"}, "price": []}
        ]);
        let table = resolve(&list).unwrap();

        let addresses: Vec<&str> = table
            .get("XAUUSD")
            .unwrap()
            .iter()
            .map(|a| a.address.as_str())
            .collect();
        assert_eq!(addresses, vec!["new"]);
        assert!(table.get("XAGUSD").is_none());
    }

    #[test]
    fn test_missing_exponent_defaults_to_zero() {
        let table = resolve(&product_list()).unwrap();
        let btc = table.get("BTCUSD").unwrap();
        assert_eq!(btc.len(), 2);
        assert_eq!(btc[1].address, "GEmzzL6xabxwCZXvKLLr5ihbUrv6Awwrij3vKoDdxBsj");
        assert_eq!(btc[1].exponent, 0);
    }

    #[test]
    fn test_symbol_without_accounts_is_omitted() {
        let table = resolve(&product_list()).unwrap();
        assert!(table.get("XAGUSD").is_none());
        assert!(table.get("EURUSD").is_none());
    }

    #[test]
    fn test_non_array_result_fails() {
        let err = resolve(&json!({"products": []})).unwrap_err();
        assert!(matches!(err, RegistryError::Resolution(ref m) if m.contains("object")));
        assert!(resolve(&Value::Null).is_err());
    }

    #[test]
    fn test_undecodable_product_fails() {
        let bad = json!([{"attr_dict": {"generic_symbol": "XAUUSD"}, "price": [{"account": "a", "price_exponent": "minus five"}]}]);
        assert!(matches!(resolve(&bad), Err(RegistryError::Resolution(_))));
    }

    #[test]
    fn test_empty_list() {
        let table = resolve(&json!([])).unwrap();
        assert!(table.is_empty());
        assert!(table.all_accounts().is_empty());
    }

    #[test]
    fn test_all_accounts_in_symbol_order() {
        let table = resolve(&product_list()).unwrap();
        let exponents: Vec<i32> = table.all_accounts().iter().map(|a| a.exponent).collect();
        assert_eq!(exponents, vec![-8, 0, -5, -3]);
    }
}

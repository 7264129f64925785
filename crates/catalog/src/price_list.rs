//! Supplier price-list document.
//!
//! ```yaml
//! shop: Связной
//! categories:
//!   - id: 224
//!     name: Смартфоны
//! goods:
//!   - name: Apple iPhone XS Max 512GB (золотистый)
//!     category: 224
//!     model: apple/iphone/xs-max
//!     price: 110000
//!     price_rrc: 116990
//!     quantity: 14
//!     parameters:
//!       "Диагональ (дюйм)": 6.5
//!       "Цвет": золотистый
//! ```
//!
//! JSON documents with the same shape parse too.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use procura_core::CategoryId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceList {
    pub shop: String,
    #[serde(default)]
    pub categories: Vec<PriceListCategory>,
    #[serde(default)]
    pub goods: Vec<PriceListGood>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceListCategory {
    pub id: CategoryId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceListGood {
    pub name: String,
    pub category: CategoryId,
    #[serde(default)]
    pub model: String,
    pub price: u64,
    pub price_rrc: u64,
    pub quantity: u32,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterValue>,
}

/// Scalar parameter value as written by the supplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl core::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ParameterValue::Text(s) => f.write_str(s),
            ParameterValue::Integer(n) => write!(f, "{n}"),
            ParameterValue::Float(x) => write!(f, "{x}"),
            ParameterValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl PriceList {
    /// Parse a YAML (or JSON) document.
    pub fn from_yaml(input: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
shop: Связной
categories:
  - id: 224
    name: Смартфоны
  - id: 15
    name: Аксессуары
goods:
  - id: 4216292
    category: 224
    model: apple/iphone/xs-max
    name: Смартфон Apple iPhone XS Max 512GB (золотистый)
    price: 110000
    price_rrc: 116990
    quantity: 14
    parameters:
      "Диагональ (дюйм)": 6.5
      "Разрешение (пикс)": 2688x1242
      "Встроенная память (Гб)": 512
      "Цвет": золотистый
      "NFC": true
"#;

    #[test]
    fn parses_yaml_document_and_ignores_unknown_keys() {
        let doc = PriceList::from_yaml(DOC).unwrap();
        assert_eq!(doc.shop, "Связной");
        assert_eq!(doc.categories.len(), 2);
        assert_eq!(doc.goods.len(), 1);

        let good = &doc.goods[0];
        assert_eq!(good.category, CategoryId::new(224));
        assert_eq!(good.quantity, 14);
        assert_eq!(good.parameters["Встроенная память (Гб)"], ParameterValue::Integer(512));
        assert_eq!(good.parameters["Диагональ (дюйм)"].to_string(), "6.5");
        assert_eq!(good.parameters["NFC"].to_string(), "true");
        assert_eq!(good.parameters["Разрешение (пикс)"].to_string(), "2688x1242");
    }

    #[test]
    fn parses_json_document() {
        let json = r#"{"shop":"A","categories":[{"id":1,"name":"C"}],
            "goods":[{"name":"G","category":1,"model":"m","price":1,"price_rrc":2,"quantity":3}]}"#;
        let doc = PriceList::from_yaml(json).unwrap();
        assert_eq!(doc.goods[0].price_rrc, 2);
        assert!(doc.goods[0].parameters.is_empty());
    }

    #[test]
    fn rejects_negative_quantity_and_missing_shop() {
        let negative = "shop: A\ngoods:\n  - {name: G, category: 1, price: 1, price_rrc: 1, quantity: -1}\n";
        assert!(PriceList::from_yaml(negative).is_err());
        assert!(PriceList::from_yaml("categories: []\n").is_err());
        assert!(PriceList::from_yaml(": not yaml : [").is_err());
    }
}

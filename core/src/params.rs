//! Value types describing what a caller asks the delivery service for.

use std::collections::HashMap;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::json::JsonExt;
use crate::json::JsonObject;
use crate::json::non_blank;

pub type ParameterMap = HashMap<String, String>;

const MBOX_PARAMETERS: &str = "mboxparameters";
const PROFILE_PARAMETERS: &str = "profileparameters";
const ORDER_PARAMETERS: &str = "orderparameters";
const PRODUCT_PARAMETERS: &str = "productparameters";

const ID: &str = "id";
const TOTAL: &str = "total";
const PURCHASED_PRODUCT_IDS: &str = "purchasedProductIds";
const CATEGORY_ID: &str = "categoryId";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TargetOrder {
    pub id: String,
    pub total: f64,
    pub purchased_product_ids: Vec<String>,
}

impl TargetOrder {
    pub fn new(id: impl Into<String>, total: f64, purchased_product_ids: Vec<String>) -> Self {
        Self {
            id: id.into(),
            total,
            purchased_product_ids,
        }
    }

    /// Reads `{id, total, purchasedProductIds}`. The total may be a number or
    /// a string holding a float; anything else rejects the whole order.
    pub fn from_json(value: &Value) -> Option<Self> {
        let id = value.opt_non_blank(ID)?.to_string();
        let total = match value.opt_value(TOTAL)? {
            Value::Number(number) => number.as_f64()?,
            Value::String(text) => text.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        if !total.is_finite() {
            return None;
        }
        let purchased_product_ids = value
            .opt_array(PURCHASED_PRODUCT_IDS)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            id,
            total,
            purchased_product_ids,
        })
    }

    /// Request `order` node; `None` when the order cannot be sent.
    pub fn to_json(&self) -> Option<Value> {
        if non_blank(Some(&self.id)).is_none() || !self.total.is_finite() {
            return None;
        }
        let mut node = Map::new();
        node.insert(ID.to_string(), Value::String(self.id.clone()));
        node.insert(TOTAL.to_string(), json!(self.total));
        if !self.purchased_product_ids.is_empty() {
            node.insert(
                PURCHASED_PRODUCT_IDS.to_string(),
                json!(self.purchased_product_ids),
            );
        }
        Some(Value::Object(node))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetProduct {
    pub id: String,
    pub category_id: Option<String>,
}

impl TargetProduct {
    pub fn new(id: impl Into<String>, category_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            category_id,
        }
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        let id = value.opt_non_blank(ID)?.to_string();
        let category_id = value.opt_non_blank(CATEGORY_ID).map(str::to_string);
        Some(Self { id, category_id })
    }

    pub fn to_json(&self) -> Option<Value> {
        non_blank(Some(&self.id))?;
        let mut node = Map::new();
        node.insert(ID.to_string(), Value::String(self.id.clone()));
        if let Some(category_id) = non_blank(self.category_id.as_deref()) {
            node.insert(
                CATEGORY_ID.to_string(),
                Value::String(category_id.to_string()),
            );
        }
        Some(Value::Object(node))
    }
}

/// Mbox, profile, order and product parameters attached to a request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TargetParameters {
    pub mbox_parameters: Option<ParameterMap>,
    pub profile_parameters: Option<ParameterMap>,
    pub product: Option<TargetProduct>,
    pub order: Option<TargetOrder>,
}

impl TargetParameters {
    pub fn is_empty(&self) -> bool {
        self.mbox_parameters.as_ref().is_none_or(HashMap::is_empty)
            && self
                .profile_parameters
                .as_ref()
                .is_none_or(HashMap::is_empty)
            && self.product.is_none()
            && self.order.is_none()
    }

    pub fn from_json(value: &Value) -> Self {
        Self {
            mbox_parameters: value.opt_object(MBOX_PARAMETERS).map(string_entries),
            profile_parameters: value.opt_object(PROFILE_PARAMETERS).map(string_entries),
            product: value
                .opt_value(PRODUCT_PARAMETERS)
                .and_then(TargetProduct::from_json),
            order: value
                .opt_value(ORDER_PARAMETERS)
                .and_then(TargetOrder::from_json),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut node = Map::new();
        if let Some(params) = &self.mbox_parameters {
            node.insert(MBOX_PARAMETERS.to_string(), json!(params));
        }
        if let Some(params) = &self.profile_parameters {
            node.insert(PROFILE_PARAMETERS.to_string(), json!(params));
        }
        if let Some(order) = self.order.as_ref().and_then(TargetOrder::to_json) {
            node.insert(ORDER_PARAMETERS.to_string(), order);
        }
        if let Some(product) = self.product.as_ref().and_then(TargetProduct::to_json) {
            node.insert(PRODUCT_PARAMETERS.to_string(), product);
        }
        Value::Object(node)
    }
}

fn string_entries(object: &JsonObject) -> ParameterMap {
    object
        .iter()
        .filter_map(|(key, value)| value.as_str().map(|s| (key.clone(), s.to_string())))
        .collect()
}

/// Folds a list of parameter sets; later entries win.
///
/// Map keys are overwritten key by key and the empty key is dropped. Order
/// and product come from the last entry that carries one.
pub fn merge<'a, I>(parameters: I) -> TargetParameters
where
    I: IntoIterator<Item = &'a TargetParameters>,
{
    let mut mbox_parameters = ParameterMap::new();
    let mut profile_parameters = ParameterMap::new();
    let mut product = None;
    let mut order = None;

    for entry in parameters {
        if let Some(params) = &entry.mbox_parameters {
            mbox_parameters.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
            mbox_parameters.remove("");
        }
        if let Some(params) = &entry.profile_parameters {
            profile_parameters.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
            profile_parameters.remove("");
        }
        if entry.product.is_some() {
            product.clone_from(&entry.product);
        }
        if entry.order.is_some() {
            order.clone_from(&entry.order);
        }
    }

    TargetParameters {
        mbox_parameters: (!mbox_parameters.is_empty()).then_some(mbox_parameters),
        profile_parameters: (!profile_parameters.is_empty()).then_some(profile_parameters),
        product,
        order,
    }
}

/// An mbox to fetch and render right away (execute).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MboxRequest {
    pub name: String,
    pub parameters: Option<TargetParameters>,
    pub default_content: String,
    pub response_pair_id: Option<String>,
}

impl MboxRequest {
    pub fn new(name: impl Into<String>, default_content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_content: default_content.into(),
            ..Default::default()
        }
    }

    pub fn with_parameters(mut self, parameters: TargetParameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_response_pair_id(mut self, id: impl Into<String>) -> Self {
        self.response_pair_id = Some(id.into());
        self
    }

    /// Reads `{name, defaultContent, responsePairId, targetParameters}`.
    pub fn from_json(value: &Value) -> Option<Self> {
        let name = value.opt_str("name")?.to_string();
        Some(Self {
            name,
            parameters: value
                .opt_value("targetParameters")
                .map(TargetParameters::from_json),
            default_content: value.opt_str("defaultContent").unwrap_or_default().to_string(),
            response_pair_id: value.opt_str("responsePairId").map(str::to_string),
        })
    }
}

/// An mbox to fetch now and cache for later local use (prefetch).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MboxPrefetch {
    pub name: String,
    pub parameters: Option<TargetParameters>,
}

impl MboxPrefetch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: None,
        }
    }

    pub fn with_parameters(mut self, parameters: TargetParameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        let name = value.opt_str("name")?.to_string();
        Some(Self {
            name,
            parameters: value
                .opt_value("targetParameters")
                .map(TargetParameters::from_json),
        })
    }
}

use serde::{Deserialize, Serialize};

/// 提取结果的置信度标签。
/// `Cached` 仅由缓存命中路径合成，提示 UI 数值可能已过时。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
    Cached,
}

impl Default for Confidence {
    fn default() -> Self {
        Self::Low
    }
}

/// 支出类目（封闭枚举）。模型返回未知类目时归入 `Other`。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpenseCategory {
    Rent,
    Marketing,
    Supplies,
    Logistics,
    Utilities,
    Salary,
    #[default]
    #[serde(other)]
    Other,
}

/// 结构化提取结果，按 `intent` 标签区分四类记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "lowercase")]
pub enum ExtractionResult {
    Sale(SaleRecord),
    Expense(ExpenseRecord),
    Product(ProductRecord),
    Inquiry(InquiryRecord),
}

impl ExtractionResult {
    pub fn confidence(&self) -> Confidence {
        match self {
            Self::Sale(r) => r.confidence,
            Self::Expense(r) => r.confidence,
            Self::Product(r) => r.confidence,
            Self::Inquiry(r) => r.confidence,
        }
    }

    pub fn set_confidence(&mut self, confidence: Confidence) {
        match self {
            Self::Sale(r) => r.confidence = confidence,
            Self::Expense(r) => r.confidence = confidence,
            Self::Product(r) => r.confidence = confidence,
            Self::Inquiry(r) => r.confidence = confidence,
        }
    }

    pub fn intent_name(&self) -> &'static str {
        match self {
            Self::Sale(_) => "sale",
            Self::Expense(_) => "expense",
            Self::Product(_) => "product",
            Self::Inquiry(_) => "inquiry",
        }
    }
}

/// 销售记录。`customers` 为多客户子订单；
/// 当恰好只有一个客户时，客户端会把字段展平到顶层的 legacy 字段
/// （customerName/customerHandle/orderItems/total/deliveryFee/platform），
/// 供单客户 UI 路径直接消费。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_type: Option<String>,
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub customers: Vec<CustomerOrder>,

    // 单客户展平字段（兼容层，仅 customers.len() == 1 时填充）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_items: Option<Vec<OrderItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_fee: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
}

/// 单个客户的子订单。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerOrder {
    #[serde(default)]
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_fee: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<OrderItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_name: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_type: Option<String>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub category: ExpenseCategory,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub cost_price: f64,
    #[serde(default)]
    pub stock: u32,
    #[serde(default = "default_product_category")]
    pub category: String,
    pub confidence: Confidence,
}

fn default_product_category() -> String {
    "Other".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InquiryRecord {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_actions: Vec<String>,
    pub confidence: Confidence,
}

/// 一段输入片段：自由文本和/或 base64 图片，二者可同时存在。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
}

/// 库存条目：提示词中的匹配上下文，只取 name/price/stock，其余字段忽略。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub stock: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_result_roundtrips_intent_tag() {
        let r = ExtractionResult::Expense(ExpenseRecord {
            record_type: Some("expense".to_string()),
            amount: 5000.0,
            category: ExpenseCategory::Logistics,
            description: "delivery to Surulere".to_string(),
            vendor: Some("GIG".to_string()),
            payment_method: None,
            date: None,
            confidence: Confidence::High,
        });

        let json = sonic_rs::to_string(&r).unwrap();
        assert!(json.contains("\"intent\":\"expense\""));
        assert!(json.contains("\"category\":\"Logistics\""));

        let back: ExtractionResult = sonic_rs::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn unknown_expense_category_maps_to_other() {
        let json = r#"{"intent":"expense","amount":100,"category":"Groceries","description":"x","confidence":"low"}"#;
        let r: ExtractionResult = sonic_rs::from_str(json).unwrap();
        let ExtractionResult::Expense(e) = r else {
            panic!("expected expense");
        };
        assert_eq!(e.category, ExpenseCategory::Other);
    }

    #[test]
    fn order_item_quantity_defaults_to_one() {
        let json = r#"{"productName":"shirt","unitPrice":1500}"#;
        let item: OrderItem = sonic_rs::from_str(json).unwrap();
        assert_eq!(item.quantity, 1);
        assert_eq!(item.unit_price, Some(1500.0));
    }

    #[test]
    fn set_confidence_reaches_every_variant() {
        let mut r = ExtractionResult::Inquiry(InquiryRecord {
            suggested_actions: vec!["Manual Entry".to_string()],
            confidence: Confidence::Low,
        });
        r.set_confidence(Confidence::Cached);
        assert_eq!(r.confidence(), Confidence::Cached);
        assert_eq!(r.intent_name(), "inquiry");
    }
}

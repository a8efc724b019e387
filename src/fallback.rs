//! 降级提取器：模型不可用时的纯正则/启发式兜底。
//!
//! 永不失败：按 支出 → 商品 → 销售 → 询盘 的顺序逐分支尝试，
//! 每个分支首个命中即返回，全部落空时回退为带三个固定建议动作的询盘。
//! 所有结果置信度一律为 `low`。同一输入永远得到同一输出。

use crate::types::{
    Confidence, ExpenseCategory, ExtractionResult, ExpenseRecord, InquiryRecord, OrderItem,
    ProductRecord, SaleRecord,
};
use once_cell::sync::Lazy;
use regex::Regex;

static EXPENSE_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:paid|spent|cost|expense|logistics|delivery).*?(?:₦|\$)?(\d+(?:[,.\s]\d{3})*)")
        .unwrap()
});
static EXPENSE_CATEGORY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(delivery|logistics|rent|utilities|supplies|marketing|salary)").unwrap()
});
static VENDOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(?:to|with|from)\s+(\w+)").unwrap());

static PRODUCT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:add|new item|new|product|item)\s+([a-zA-Z][a-zA-Z ]*?)(?:\s+(?:price|cost|stock|at|for)\b.*|\s*:.*)?$")
        .unwrap()
});
static PRICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)price.*?(?:₦|\$)?(\d+(?:[,.\s]\d{3})*)").unwrap());
static COST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)cost.*?(?:₦|\$)?(\d+(?:[,.\s]\d{3})*)").unwrap());
static STOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)stock.*?(\d+)").unwrap());

static QUANTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*(?:x|of|@|units?|items?)\s+(\w+)").unwrap());
static TOTAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:total|for).*?(?:₦|\$)?(\d+(?:[,.\s]\d{3})*)").unwrap());
static DELIVERY_FEE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)delivery.*?(?:₦|\$)?(\d+(?:[,.\s]\d{3})*)").unwrap());
static PLATFORM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(whatsapp|instagram|facebook|telegram|phone|call|walk-in)").unwrap()
});
static CUSTOMER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:customer|user|client)\s+([a-zA-Z]+)").unwrap());

/// 对自由文本做一次确定性的结构化猜测。
pub fn fallback_extract(input: &str) -> ExtractionResult {
    let lower = input.to_lowercase();

    if lower.contains("paid") || lower.contains("expense") || lower.contains("cost") {
        if let Some(expense) = try_expense(input) {
            return expense;
        }
    }

    if lower.contains("add") || lower.contains("product") || lower.contains("new item") {
        if let Some(product) = try_product(input) {
            return product;
        }
    }

    if lower.contains("order") || lower.contains("buy") || lower.contains("purchased") {
        if let Some(sale) = try_sale(input) {
            return sale;
        }
    }

    ExtractionResult::Inquiry(InquiryRecord {
        suggested_actions: vec![
            "Manual Entry".to_string(),
            "Try Again".to_string(),
            "Contact Support".to_string(),
        ],
        confidence: Confidence::Low,
    })
}

fn try_expense(input: &str) -> Option<ExtractionResult> {
    let caps = EXPENSE_AMOUNT.captures(input)?;
    let amount = parse_amount(&caps[1]);

    let category = EXPENSE_CATEGORY
        .captures(input)
        .map(|c| map_category(&c[1]))
        .unwrap_or(ExpenseCategory::Other);
    let vendor = VENDOR
        .captures(input)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| "Unknown".to_string());

    Some(ExtractionResult::Expense(ExpenseRecord {
        record_type: Some("expense".to_string()),
        amount: amount as f64,
        category,
        description: input.to_string(),
        vendor: Some(vendor),
        payment_method: None,
        date: None,
        confidence: Confidence::Low,
    }))
}

fn try_product(input: &str) -> Option<ExtractionResult> {
    let caps = PRODUCT_NAME.captures(input)?;
    let name = clean_product_name(&caps[1]);

    let price = PRICE.captures(input).map(|c| parse_amount(&c[1])).unwrap_or(0);
    let cost = COST.captures(input).map(|c| parse_amount(&c[1])).unwrap_or(0);
    let stock = STOCK
        .captures(input)
        .and_then(|c| c[1].parse::<u32>().ok())
        .unwrap_or(0);

    Some(ExtractionResult::Product(ProductRecord {
        name,
        price: price as f64,
        cost_price: cost as f64,
        stock,
        category: "Other".to_string(),
        confidence: Confidence::Low,
    }))
}

fn try_sale(input: &str) -> Option<ExtractionResult> {
    let quantity = QUANTITY.captures(input);
    let total = TOTAL.captures(input);
    if quantity.is_none() && total.is_none() {
        return None;
    }

    let customer_name = CUSTOMER
        .captures(input)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| "Customer".to_string());
    let handle = customer_name.to_lowercase().replace(' ', "_");

    let platform = PLATFORM
        .captures(input)
        .map(|c| canonical_platform(&c[1]))
        .unwrap_or("WhatsApp");

    let order_items = quantity
        .map(|c| {
            vec![OrderItem {
                product_name: c[2].to_string(),
                quantity: c[1].parse().unwrap_or(1),
                variant: None,
                unit_price: Some(0.0),
            }]
        })
        .unwrap_or_default();

    let total = total.map(|c| parse_amount(&c[1])).unwrap_or(0);
    let delivery_fee = DELIVERY_FEE
        .captures(input)
        .map(|c| parse_amount(&c[1]))
        .unwrap_or(0);

    Some(ExtractionResult::Sale(SaleRecord {
        record_type: Some("order".to_string()),
        confidence: Confidence::Low,
        order_type: None,
        customers: Vec::new(),
        customer_name: Some(customer_name),
        customer_handle: Some(handle),
        order_items: Some(order_items),
        total: Some(total as f64),
        delivery_fee: Some(delivery_fee as f64),
        platform: Some(platform.to_string()),
        payment_method: None,
    }))
}

/// 去掉千分位分隔（逗号/点/空格）后按整数解析，解析失败回退为 0。
fn parse_amount(raw: &str) -> i64 {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

fn map_category(keyword: &str) -> ExpenseCategory {
    match keyword.to_lowercase().as_str() {
        "delivery" | "logistics" => ExpenseCategory::Logistics,
        "rent" => ExpenseCategory::Rent,
        "utilities" => ExpenseCategory::Utilities,
        "supplies" => ExpenseCategory::Supplies,
        "marketing" => ExpenseCategory::Marketing,
        "salary" => ExpenseCategory::Salary,
        _ => ExpenseCategory::Other,
    }
}

fn canonical_platform(keyword: &str) -> &'static str {
    match keyword.to_lowercase().as_str() {
        "instagram" => "Instagram",
        "facebook" => "Facebook",
        "telegram" => "Telegram",
        "phone" | "call" => "Phone",
        "walk-in" => "Walk-in",
        _ => "WhatsApp",
    }
}

/// 名称捕获可能连带命中的引导词（如 "new item Blue Scarf"），逐个剥掉。
fn clean_product_name(raw: &str) -> String {
    let mut name = raw.trim();
    loop {
        let lower = name.to_lowercase();
        let mut stripped = false;
        for prefix in ["new item ", "add ", "new ", "product ", "item "] {
            if lower.starts_with(prefix) {
                name = name[prefix.len()..].trim_start();
                stripped = true;
                break;
            }
        }
        if !stripped {
            break;
        }
    }
    if name.is_empty() {
        "New Product".to_string()
    } else {
        name.trim().to_string()
    }
}

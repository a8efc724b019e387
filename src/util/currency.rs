/// 货币代码到符号的映射，未知代码原样返回。
pub fn currency_symbol(code: &str) -> &str {
    match code {
        "NGN" => "₦",
        "USD" => "$",
        "GBP" => "£",
        "EUR" => "€",
        "GHS" => "₵",
        "KES" => "KSh",
        "ZAR" => "R",
        other => other,
    }
}

/// 格式化金额：符号 + 千分位 + 两位小数（如 `₦1,234.50`）。
pub fn format_currency(amount: f64, code: &str) -> String {
    let symbol = currency_symbol(code);
    let negative = amount < 0.0;
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = cents / 100;
    let frac = cents % 100;

    let sign = if negative { "-" } else { "" };
    format!("{sign}{symbol}{}.{frac:02}", group_thousands(whole))
}

/// 整数千分位分组（`1234567` → `1,234,567`）。
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_naira_with_grouping() {
        assert_eq!(format_currency(1234.5, "NGN"), "₦1,234.50");
        assert_eq!(format_currency(1_000_000.0, "NGN"), "₦1,000,000.00");
        assert_eq!(format_currency(0.0, "NGN"), "₦0.00");
    }

    #[test]
    fn unknown_code_falls_back_to_code() {
        assert_eq!(format_currency(12.0, "XOF"), "XOF12.00");
    }
}

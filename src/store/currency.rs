pub const DEFAULT_CURRENCY: &str = "USD";

const SYMBOLS: &[(&str, &str)] = &[
    ("CNY", "RMB"),
    ("EUR", "€"),
    ("GBP", "₤"),
    ("HKD", "HK$"),
    ("TWD", "TW$"),
    ("USD", "US$"),
];

/// Display symbol for `code`, or the code itself when it has none.
pub fn symbol_for(code: &str) -> &str {
    SYMBOLS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, s)| *s)
        .unwrap_or(code)
}

/// Currency to show a price in: the user's preference when the item is
/// priced in it, else the suggestion, else [`DEFAULT_CURRENCY`].
pub fn preferred_code<'a>(
    preference: Option<&'a str>,
    suggested: &'a str,
    available: &[&str],
) -> &'a str {
    let offered = |code: &str| available.iter().any(|c| *c == code);
    match preference.filter(|p| !p.is_empty()) {
        Some(p) if offered(p) => p,
        Some(_) => DEFAULT_CURRENCY,
        None if offered(suggested) => suggested,
        None => DEFAULT_CURRENCY,
    }
}

pub fn format_price(price: f64, symbol: &str) -> String {
    format!("{symbol}{price:.2}")
}

//! Formatting Rule Registry
//!
//! Formatters are keyed by (placeholder kind, template category). Lookup
//! falls back from the exact pair to the kind's default, then to
//! pass-through. New categories or locales are a `register` call.

use chrono::{DateTime, Datelike, FixedOffset, Locale, NaiveDate, NaiveDateTime, TimeZone};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{EngineResult, FormatError};
use crate::templates::{Category, PlaceholderKind};

/// Caller-supplied formatting parameters for one template.
#[derive(Debug, Clone)]
pub struct FormatContext {
    pub category: Category,
    pub locale: Locale,
    pub locale_name: String,
    pub offset: FixedOffset,
    pub currency_symbol: String,
}

impl FormatContext {
    pub fn new(config: &EngineConfig, category: &Category) -> EngineResult<Self> {
        Ok(Self {
            category: category.clone(),
            locale: config.chrono_locale()?,
            locale_name: config.locale.clone(),
            offset: config.offset()?,
            currency_symbol: config.currency_symbol.clone(),
        })
    }

    fn is_english(&self) -> bool {
        self.locale_name.to_ascii_lowercase().starts_with("en")
    }
}

pub trait Formatter: Send + Sync {
    fn format(&self, raw: &str, ctx: &FormatContext) -> Result<String, FormatError>;
}

impl<F> Formatter for F
where
    F: Fn(&str, &FormatContext) -> Result<String, FormatError> + Send + Sync,
{
    fn format(&self, raw: &str, ctx: &FormatContext) -> Result<String, FormatError> {
        self(raw, ctx)
    }
}

type RuleKey = (PlaceholderKind, Option<String>);

#[derive(Clone, Default)]
pub struct FormatterRegistry {
    rules: HashMap<RuleKey, Arc<dyn Formatter>>,
}

impl FormatterRegistry {
    /// An empty registry: every value passes through unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Date, address and currency rules for the stock categories.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_default(PlaceholderKind::Date, DateFormatter { style: DateStyle::Plain });
        registry.register(
            PlaceholderKind::Date,
            "affidavit",
            DateFormatter { style: DateStyle::OfMonth },
        );
        registry.register_default(PlaceholderKind::Address, join_address_lines);
        registry.register(PlaceholderKind::Address, "letter", letter_address);
        registry.register(PlaceholderKind::Address, "affidavit", affidavit_address);
        registry.register_default(PlaceholderKind::Currency, format_currency);
        registry
    }

    pub fn register(
        &mut self,
        kind: PlaceholderKind,
        category: &str,
        formatter: impl Formatter + 'static,
    ) {
        let key = (kind, Some(Category::new(category).key()));
        self.rules.insert(key, Arc::new(formatter));
    }

    pub fn register_default(&mut self, kind: PlaceholderKind, formatter: impl Formatter + 'static) {
        self.rules.insert((kind, None), Arc::new(formatter));
    }

    pub fn lookup(&self, kind: PlaceholderKind, category: &Category) -> Option<&dyn Formatter> {
        self.rules
            .get(&(kind, Some(category.key())))
            .or_else(|| self.rules.get(&(kind, None)))
            .map(|f| f.as_ref())
    }

    pub fn format(
        &self,
        kind: PlaceholderKind,
        raw: &str,
        ctx: &FormatContext,
    ) -> Result<String, FormatError> {
        match self.lookup(kind, &ctx.category) {
            Some(formatter) => formatter.format(raw, ctx),
            None => Ok(raw.to_string()),
        }
    }
}

impl std::fmt::Debug for FormatterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.rules.keys().collect();
        keys.sort_by_key(|(kind, cat)| (format!("{:?}", kind), cat.clone()));
        f.debug_struct("FormatterRegistry").field("rules", &keys).finish()
    }
}

// --- Dates ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateStyle {
    /// 22nd September, 2025
    Plain,
    /// 22nd of September, 2025
    OfMonth,
}

#[derive(Debug, Clone, Copy)]
pub struct DateFormatter {
    pub style: DateStyle,
}

impl Formatter for DateFormatter {
    fn format(&self, raw: &str, ctx: &FormatContext) -> Result<String, FormatError> {
        let date = parse_date(raw, ctx.offset).ok_or_else(|| FormatError::invalid_date(raw))?;
        let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| FormatError::invalid_date(raw))?;
        let local: DateTime<FixedOffset> = ctx
            .offset
            .from_local_datetime(&midnight)
            .single()
            .ok_or_else(|| FormatError::invalid_date(raw))?;
        let month = local.format_localized("%B", ctx.locale).to_string();

        if !ctx.is_english() {
            return Ok(format!("{} {} {}", date.day(), month, date.year()));
        }
        let day = ordinal(date.day());
        Ok(match self.style {
            DateStyle::Plain => format!("{} {}, {}", day, month, date.year()),
            DateStyle::OfMonth => format!("{} of {}, {}", day, month, date.year()),
        })
    }
}

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// Calendar date in `offset` for the accepted input shapes.
pub fn parse_date(raw: &str, offset: FixedOffset) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&offset).date_naive());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }
    DATE_FORMATS.iter().find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

pub fn ordinal(n: u32) -> String {
    let suffix = if (11..=13).contains(&(n % 100)) {
        "th"
    } else {
        match n % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        }
    };
    format!("{}{}", n, suffix)
}

// --- Addresses ---

fn address_lines(raw: &str) -> Vec<&str> {
    raw.split(',').map(str::trim).filter(|l| !l.is_empty()).collect()
}

/// Generic rule: one line per comma-separated part.
pub fn join_address_lines(raw: &str, _ctx: &FormatContext) -> Result<String, FormatError> {
    Ok(address_lines(raw).join("\n"))
}

/// Comma after every line but the last, period at the end.
pub fn letter_address(raw: &str, _ctx: &FormatContext) -> Result<String, FormatError> {
    let lines = address_lines(raw);
    let Some((last, init)) = lines.split_last() else {
        return Ok(raw.trim().to_string());
    };
    let mut out: Vec<String> = init.iter().map(|l| format!("{},", l)).collect();
    if last.ends_with('.') {
        out.push(last.to_string());
    } else {
        out.push(format!("{}.", last));
    }
    Ok(out.join("\n"))
}

/// Kept as typed, without trailing periods.
pub fn affidavit_address(raw: &str, _ctx: &FormatContext) -> Result<String, FormatError> {
    let mut address = raw.trim();
    while let Some(stripped) = address.strip_suffix('.') {
        address = stripped.trim_end();
    }
    Ok(address.to_string())
}

// --- Currency ---

/// Works on the digits as typed, so amounts of any length keep every digit.
/// More than two significant decimal places is an invalid number.
pub fn format_currency(raw: &str, ctx: &FormatContext) -> Result<String, FormatError> {
    let invalid = || FormatError::invalid_number(raw);
    let strip_symbol = |s: &str| -> String {
        let s = s.trim();
        if ctx.currency_symbol.is_empty() {
            s.to_string()
        } else {
            s.trim_start_matches(ctx.currency_symbol.as_str()).to_string()
        }
    };

    let unsigned = strip_symbol(raw);
    let (negative, unsigned) = match unsigned.strip_prefix('-') {
        Some(rest) => (true, strip_symbol(rest)),
        None => (false, unsigned),
    };
    let cleaned: String = unsigned
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();

    let (whole, fraction) = cleaned.split_once('.').unwrap_or((cleaned.as_str(), ""));
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !all_digits(whole) || !all_digits(fraction) {
        return Err(invalid());
    }

    let fraction = fraction.trim_end_matches('0');
    if fraction.len() > 2 {
        return Err(invalid());
    }
    let cents = format!("{:0<2}", fraction);

    let whole = whole.trim_start_matches('0');
    let whole = if whole.is_empty() { "0" } else { whole };
    let is_zero = whole == "0" && cents == "00";
    let sign = if negative && !is_zero { "-" } else { "" };
    Ok(format!("{}{}{}.{}", sign, ctx.currency_symbol, group_thousands(whole), cents))
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormatErrorKind;

    fn ctx(category: &str, locale: &str, timezone: &str) -> FormatContext {
        let config = EngineConfig {
            locale: locale.into(),
            timezone: timezone.into(),
            currency_symbol: "$".into(),
            ..Default::default()
        };
        FormatContext::new(&config, &Category::new(category)).unwrap()
    }

    #[test]
    fn test_date_styles_by_category() {
        let registry = FormatterRegistry::with_builtins();
        let letter = ctx("Letter", "en_US", "UTC");
        let affidavit = ctx("Affidavit", "en_US", "UTC");
        assert_eq!(
            registry.format(PlaceholderKind::Date, "2025-09-22", &letter).unwrap(),
            "22nd September, 2025"
        );
        assert_eq!(
            registry.format(PlaceholderKind::Date, "22/09/2025", &affidavit).unwrap(),
            "22nd of September, 2025"
        );
    }

    #[test]
    fn test_date_uses_caller_timezone() {
        let registry = FormatterRegistry::with_builtins();
        let lagos = ctx("Letter", "en_US", "+01:00");
        assert_eq!(
            registry.format(PlaceholderKind::Date, "2025-09-22T23:30:00Z", &lagos).unwrap(),
            "23rd September, 2025"
        );
        let utc = ctx("Letter", "en_US", "UTC");
        assert_eq!(
            registry.format(PlaceholderKind::Date, "2025-09-22T23:30:00Z", &utc).unwrap(),
            "22nd September, 2025"
        );
    }

    #[test]
    fn test_date_localized_month() {
        let registry = FormatterRegistry::with_builtins();
        let fr = ctx("Letter", "fr_FR", "UTC");
        assert_eq!(registry.format(PlaceholderKind::Date, "2025-09-01", &fr).unwrap(), "1 septembre 2025");
    }

    #[test]
    fn test_invalid_date() {
        let registry = FormatterRegistry::with_builtins();
        let err = registry
            .format(PlaceholderKind::Date, "next tuesday-ish", &ctx("Letter", "en_US", "UTC"))
            .unwrap_err();
        assert_eq!(err.kind, FormatErrorKind::InvalidDate);
        assert_eq!(err.raw, "next tuesday-ish");
    }

    #[test]
    fn test_ordinals() {
        let got: Vec<_> = [1, 2, 3, 4, 11, 12, 13, 21, 22, 23, 111].iter().map(|n| ordinal(*n)).collect();
        assert_eq!(
            got,
            vec!["1st", "2nd", "3rd", "4th", "11th", "12th", "13th", "21st", "22nd", "23rd", "111th"]
        );
    }

    #[test]
    fn test_address_rules() {
        let registry = FormatterRegistry::with_builtins();
        let raw = "24 Avenue Road, Osato Junction,, Benin City";
        assert_eq!(
            registry.format(PlaceholderKind::Address, raw, &ctx("letter", "en_US", "UTC")).unwrap(),
            "24 Avenue Road,\nOsato Junction,\nBenin City."
        );
        assert_eq!(
            registry
                .format(PlaceholderKind::Address, "Benin City...", &ctx("Affidavit", "en_US", "UTC"))
                .unwrap(),
            "Benin City"
        );
        // unregistered category falls back to the generic line join
        assert_eq!(
            registry.format(PlaceholderKind::Address, raw, &ctx("Certificate", "en_US", "UTC")).unwrap(),
            "24 Avenue Road\nOsato Junction\nBenin City"
        );
    }

    #[test]
    fn test_currency() {
        let c = ctx("Invoice", "en_US", "UTC");
        assert_eq!(format_currency("1234567.5", &c).unwrap(), "$1,234,567.50");
        assert_eq!(format_currency("$12,000", &c).unwrap(), "$12,000.00");
        assert_eq!(format_currency("-999", &c).unwrap(), "-$999.00");
        assert!(format_currency("lots", &c).is_err());
    }

    #[test]
    fn test_currency_keeps_every_digit() {
        let c = ctx("Invoice", "en_US", "UTC");
        assert_eq!(
            format_currency("12345678901234567890", &c).unwrap(),
            "$12,345,678,901,234,567,890.00"
        );
        assert_eq!(format_currency("0.1", &c).unwrap(), "$0.10");
        assert_eq!(format_currency(".05", &c).unwrap(), "$0.05");
        assert_eq!(format_currency("-$1,000.250", &c).unwrap(), "-$1,000.25");

        let err = format_currency("10.125", &c).unwrap_err();
        assert_eq!(err.kind, FormatErrorKind::InvalidNumber);
        assert!(format_currency("1e5", &c).is_err());
        assert!(format_currency("1.2.3", &c).is_err());
        assert!(format_currency("-", &c).is_err());
    }

    #[test]
    fn test_fallback_chain() {
        let mut registry = FormatterRegistry::new();
        let c = ctx("Certificate", "en_US", "UTC");
        assert_eq!(registry.format(PlaceholderKind::Text, "as is", &c).unwrap(), "as is");

        registry.register_default(
            PlaceholderKind::Text,
            |raw: &str, _: &FormatContext| -> Result<String, FormatError> { Ok(raw.to_uppercase()) },
        );
        assert_eq!(registry.format(PlaceholderKind::Text, "loud", &c).unwrap(), "LOUD");

        registry.register(
            PlaceholderKind::Text,
            "CERTIFICATE",
            |raw: &str, _: &FormatContext| -> Result<String, FormatError> { Ok(format!("*{}*", raw)) },
        );
        assert_eq!(registry.format(PlaceholderKind::Text, "x", &c).unwrap(), "*x*");
    }
}

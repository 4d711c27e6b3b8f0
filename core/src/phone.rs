/// Turns a dialable number into E.164 form.
///
/// Implementations must be pure: the same `(number, country)` pair always
/// yields the same answer. `None` means the input is not something that can
/// be normalized, and callers keep the raw identifier instead.
pub trait PhoneNormalizer: Send + Sync {
    fn normalize(&self, number: &str, country: Option<&str>) -> Option<String>;
}

impl<F> PhoneNormalizer for F
where
    F: Fn(&str, Option<&str>) -> Option<String> + Send + Sync,
{
    fn normalize(&self, number: &str, country: Option<&str>) -> Option<String> {
        self(number, country)
    }
}

const MIN_DIGITS: usize = 4;
const MAX_DIGITS: usize = 15;

const CALLING_CODES: &[(&str, &str)] = &[
    ("AT", "43"),
    ("AU", "61"),
    ("BE", "32"),
    ("BR", "55"),
    ("CA", "1"),
    ("CH", "41"),
    ("CN", "86"),
    ("CZ", "420"),
    ("DE", "49"),
    ("DK", "45"),
    ("ES", "34"),
    ("FI", "358"),
    ("FR", "33"),
    ("GB", "44"),
    ("IE", "353"),
    ("IN", "91"),
    ("IT", "39"),
    ("JP", "81"),
    ("MX", "52"),
    ("NL", "31"),
    ("NO", "47"),
    ("NZ", "64"),
    ("PL", "48"),
    ("PT", "351"),
    ("SE", "46"),
    ("US", "1"),
];

/// Built-in normalizer covering the common cases without a numbering-plan
/// database: international prefixes, trunk zeros and a table of calling codes.
#[derive(Debug, Default, Clone, Copy)]
pub struct DialingCodeNormalizer;

impl DialingCodeNormalizer {
    fn calling_code(country: &str) -> Option<&'static str> {
        let country = country.trim();
        CALLING_CODES
            .iter()
            .find(|(iso, _)| iso.eq_ignore_ascii_case(country))
            .map(|(_, code)| *code)
    }
}

impl PhoneNormalizer for DialingCodeNormalizer {
    fn normalize(&self, number: &str, country: Option<&str>) -> Option<String> {
        let trimmed = number.trim();
        let (international, rest) = match trimmed.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let mut digits = String::with_capacity(rest.len());
        for c in rest.chars() {
            match c {
                '0'..='9' => digits.push(c),
                ' ' | '-' | '.' | '(' | ')' | '/' => {}
                _ => return None,
            }
        }
        if digits.len() < MIN_DIGITS {
            return None;
        }

        let e164 = if international {
            digits
        } else if let Some(stripped) = digits.strip_prefix("00") {
            stripped.to_string()
        } else {
            let code = Self::calling_code(country?)?;
            if code == "1" && digits.len() == 11 && digits.starts_with('1') {
                digits
            } else if let Some(national) = digits.strip_prefix('0') {
                format!("{code}{national}")
            } else {
                format!("{code}{digits}")
            }
        };

        if e164.len() < MIN_DIGITS || e164.len() > MAX_DIGITS || e164.starts_with('0') {
            return None;
        }
        Some(format!("+{e164}"))
    }
}

/// True when `value` reads like a dialable number rather than an address.
pub fn looks_like_phone_number(value: &str) -> bool {
    let value = value.trim();
    let body = value.strip_prefix('+').unwrap_or(value);
    let mut digits = 0;
    for c in body.chars() {
        match c {
            '0'..='9' => digits += 1,
            ' ' | '-' | '.' | '(' | ')' | '/' => {}
            _ => return false,
        }
    }
    digits >= 3
}

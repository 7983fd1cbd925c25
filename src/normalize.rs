/*!
 * Field normalizers and fixed-width primitives
 *
 * Pure functions that turn whatever a spreadsheet user typed into the
 * canonical value a BPA field expects. None of them fail: on input they
 * cannot make sense of they return the best partial value available and
 * leave it to the record validity gates to decide whether the row survives.
 */

use chrono::{Datelike, Local, NaiveDate};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::dictionary::{self, ProcedureContext};

/// Replace accented Latin letters with their unaccented base letter.
///
/// Input is decomposed first, so precomposed (`ç`) and combining (`c\u{327}`)
/// spellings fold the same way. Characters without a known base letter are
/// kept as they are.
pub fn strip_diacritics(value: &str) -> String {
    value
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(fold_char)
        .collect()
}

// Letters with no canonical decomposition
fn fold_char(c: char) -> char {
    match c {
        'ø' => 'o',
        'Ø' => 'O',
        'đ' => 'd',
        'Đ' => 'D',
        'ł' => 'l',
        'Ł' => 'L',
        'ı' => 'i',
        other => other,
    }
}

/// Lookup key form: trimmed, uppercased, diacritics stripped.
pub fn normalize_key(value: &str) -> String {
    strip_diacritics(&value.trim().to_uppercase())
}

/// Keep only ASCII digits.
pub fn digits_only(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn is_digits(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

/// Numeric fixed-width field: digits only, zero-padded on the left and cut
/// to `width` keeping the leading characters.
pub fn pad_num(value: &str, width: usize) -> String {
    let digits = digits_only(value);
    let padded = format!("{:0>width$}", digits, width = width);
    padded.chars().take(width).collect()
}

/// Alphanumeric fixed-width field: uppercased, diacritics stripped,
/// space-padded on the right and cut to `width`.
///
/// Anything still outside printable ASCII after folding becomes a space so
/// the line keeps one byte per position.
pub fn pad_alpha(value: &str, width: usize) -> String {
    let folded: String = strip_diacritics(&value.to_uppercase())
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { ' ' })
        .take(width)
        .collect();
    format!("{:<width$}", folded, width = width)
}

/// Integer prefix of a cell, read the way a spreadsheet user means it:
/// `"2"`, `" 3 "`, `"4.0"` and `"5 un"` all count; anything else is 0.
pub fn parse_quantity(value: &str) -> i64 {
    let trimmed = value.trim_start();
    let (sign, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits
        .parse::<i64>()
        .map(|n| sign * n)
        .unwrap_or(0)
}

/// Date portion of a cell that may carry a time: `"2023-09-25T10:00"` and
/// `"25/09/2023 10:00"` both yield the date alone.
fn date_token(value: &str) -> &str {
    let first = value.split_whitespace().next().unwrap_or("");
    first.split('T').next().unwrap_or(first)
}

fn split_date(token: &str) -> Vec<&str> {
    for separator in ['/', '-', '.'] {
        if token.contains(separator) {
            return token.split(separator).collect();
        }
    }
    vec![token]
}

/// Billing period normalizer: returns `AAAAMM` for the common spellings.
///
/// Accepts `AAAAMM`, `DD/MM/AAAA`, `AAAA-MM-DD`, `MM/AAAA`, `AAAA/MM` and
/// two-digit years (`25/09/23` reads as 2023). Anything else falls back to
/// the first six digits found, which may be fewer than six.
pub fn normalize_competency(value: &str) -> String {
    let clean = value.trim();
    if clean.len() == 6 && is_digits(clean) {
        return clean.to_string();
    }

    let parts = split_date(date_token(clean));
    if parts.iter().all(|p| is_digits(p)) {
        match parts.as_slice() {
            [first, month, last] => {
                let year = if first.len() == 4 { *first } else { *last };
                let year = if year.len() == 2 {
                    format!("20{}", year)
                } else {
                    year.to_string()
                };
                return format!("{}{:0>2}", year, month);
            }
            [first, second] if first.len() == 4 => {
                return format!("{}{:0>2}", first, second);
            }
            [first, second] if second.len() == 4 => {
                return format!("{}{:0>2}", second, first);
            }
            _ => {}
        }
    }

    digits_only(clean).chars().take(6).collect()
}

/// Year, month and day cells of a `DD/MM/AAAA` or `AAAA-MM-DD` token.
fn date_cells(value: &str) -> Option<[&str; 3]> {
    let token = date_token(value);
    let separator = if token.contains('/') {
        '/'
    } else if token.contains('-') {
        '-'
    } else {
        return None;
    };

    let parts: Vec<&str> = token.split(separator).map(str::trim).collect();
    let [first, second, third] = parts.as_slice() else {
        return None;
    };
    if !parts.iter().all(|p| is_digits(p)) {
        return None;
    }
    if first.len() == 4 {
        Some([*first, *second, *third])
    } else {
        Some([*third, *second, *first])
    }
}

/// Calendar date of the cells. A one or two digit year is the latest year
/// ending in those digits that is not after `today`.
fn calendar_date([year, month, day]: [&str; 3], today: NaiveDate) -> Option<NaiveDate> {
    let mut full_year: i32 = year.parse().ok()?;
    if year.len() <= 2 {
        full_year += today.year() / 100 * 100;
        if full_year > today.year() {
            full_year -= 100;
        }
    }
    NaiveDate::from_ymd_opt(full_year, month.parse().ok()?, day.parse().ok()?)
}

/// Age normalizer using today's local date.
pub fn normalize_age(value: &str) -> String {
    normalize_age_at(value, Local::now().date_naive())
}

/// Age normalizer against an explicit reference date.
///
/// A plain age (1 to 3 digits, below 150) passes through. A birth date is
/// turned into whole years completed by `today`, never negative. A date
/// that does not exist, or one giving 150 years or more, yields an empty
/// age. Anything else keeps up to three of its digits.
pub fn normalize_age_at(value: &str, today: NaiveDate) -> String {
    let clean = value.trim();
    if (1..=3).contains(&clean.len()) && is_digits(clean) {
        if let Ok(age) = clean.parse::<u32>() {
            if age < 150 {
                return clean.to_string();
            }
        }
    }

    if let Some(cells) = date_cells(clean) {
        let Some(birth) = calendar_date(cells, today) else {
            return String::new();
        };
        let mut age = today.year() - birth.year();
        if (today.month(), today.day()) < (birth.month(), birth.day()) {
            age -= 1;
        }
        let age = age.max(0);
        return if age < 150 { age.to_string() } else { String::new() };
    }

    digits_only(clean).chars().take(3).collect()
}

/// Sex normalizer: `M`/`F`, also from spelled-out words such as
/// `MASCULINO` or `feminino`. Other values keep their first character.
pub fn normalize_sex(value: &str) -> String {
    let clean = value.trim().to_uppercase();
    if clean.starts_with('M') {
        "M".to_string()
    } else if clean.starts_with('F') {
        "F".to_string()
    } else {
        clean.chars().take(1).collect()
    }
}

/// Full date normalizer (`AAAAMMDD`) for the individualized layout.
///
/// Eight-digit input passes through. Three-part dates are reordered around
/// the four-digit year. Empty or unreadable input falls back to the first
/// day of `competency`.
pub fn normalize_full_date(value: &str, competency: &str) -> String {
    let clean = value.trim();
    if clean.len() == 8 && is_digits(clean) {
        return clean.to_string();
    }

    let parts = split_date(date_token(clean));
    if let [first, month, last] = parts.as_slice() {
        if [first, month, last].iter().all(|p| is_digits(p)) {
            if first.len() == 4 {
                return format!("{}{:0>2}{:0>2}", first, month, last);
            }
            if last.len() == 4 {
                return format!("{}{:0>2}{:0>2}", last, month, first);
            }
        }
    }

    format!("{}01", pad_num(competency, 6))
}

/// Procedure normalizer: resolves a free-text description to its 10-digit
/// code using the dictionary chosen by `context_hint` (the header of the
/// column the value came from), then the other dictionaries, and finally
/// treats the input as a code and keeps its digits.
pub fn normalize_procedure(value: &str, context_hint: &str) -> String {
    if value.trim().is_empty() {
        return String::new();
    }
    let key = normalize_key(value);
    let context = ProcedureContext::from_header(context_hint);
    match dictionary::lookup(&key, context) {
        Some(code) => digits_only(code),
        None => digits_only(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_strip_diacritics() {
        assert_eq!(strip_diacritics("Açúcar à São João"), "Acucar a Sao Joao");
        assert_eq!(normalize_key("  sutura de ferimento "), "SUTURA DE FERIMENTO");
        assert_eq!(normalize_key("Prova do Laço"), "PROVA DO LACO");
    }

    #[test]
    fn test_decomposed_accents_fold_like_precomposed() {
        assert_eq!(normalize_key("LAC\u{0327}O"), "LACO");
        assert_eq!(strip_diacritics("Jose\u{0301} Conceic\u{0327}a\u{0303}o"), "Jose Conceicao");
        assert_eq!(pad_alpha("JOSE\u{0301} SILVA", 12), "JOSE SILVA  ");
        assert_eq!(strip_diacritics("Søren Łukasz"), "Soren Lukasz");
        assert_eq!(
            normalize_procedure("PROVA DO LAC\u{0327}O", "BPA MEDICO"),
            "0202020509"
        );
    }

    #[test]
    fn test_pad_num() {
        assert_eq!(pad_num("123", 6), "000123");
        assert_eq!(pad_num("12.345-6", 7), "0123456");
        assert_eq!(pad_num("", 3), "000");
        assert_eq!(pad_num("1234567890123", 10), "1234567890");
    }

    #[test]
    fn test_pad_alpha() {
        assert_eq!(pad_alpha("rua são josé", 15), "RUA SAO JOSE   ");
        assert_eq!(pad_alpha("ABCDEFGH", 4), "ABCD");
        assert_eq!(pad_alpha("", 3), "   ");
        assert_eq!(pad_alpha("a\tb", 3), "A B");
        assert_eq!(pad_alpha("x€", 3).len(), 3);
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("3"), 3);
        assert_eq!(parse_quantity(" 4.0"), 4);
        assert_eq!(parse_quantity("5 un"), 5);
        assert_eq!(parse_quantity("-2"), -2);
        assert_eq!(parse_quantity("abc"), 0);
        assert_eq!(parse_quantity(""), 0);
    }

    #[test]
    fn test_competency_spellings() {
        assert_eq!(normalize_competency("202309"), "202309");
        assert_eq!(normalize_competency("25/09/2023"), "202309");
        assert_eq!(normalize_competency("09/2023"), "202309");
        assert_eq!(normalize_competency("2023-09-25"), "202309");
        assert_eq!(normalize_competency("2023-09-25T10:30:00"), "202309");
        assert_eq!(normalize_competency("25/09/2023 08:15"), "202309");
        assert_eq!(normalize_competency("5.3.2025"), "202503");
        assert_eq!(normalize_competency("25/09/23"), "202309");
        assert_eq!(normalize_competency("2023/9"), "202309");
    }

    #[test]
    fn test_competency_fails_soft() {
        assert_eq!(normalize_competency("2023"), "2023");
        assert_eq!(normalize_competency("set 2023 extra 11"), "202311");
        assert_eq!(normalize_competency(""), "");
    }

    #[test]
    fn test_age_passthrough_and_birth_date() {
        let today = date(2024, 1, 1);
        assert_eq!(normalize_age_at("25", today), "25");
        assert_eq!(normalize_age_at("10/05/1980", today), "43");
        assert_eq!(normalize_age_at("1980-05-10", today), "43");
        assert_eq!(normalize_age_at("01/01/1980", today), "44");
        assert_eq!(normalize_age_at("02/01/1980", today), "43");
    }

    #[test]
    fn test_age_against_today() {
        assert_eq!(normalize_age(" 7 "), "7");
        assert_eq!(normalize_age("01/01/1900").len(), 3);
    }

    #[test]
    fn test_age_future_birth_is_zero() {
        assert_eq!(normalize_age_at("10/05/2030", date(2024, 1, 1)), "0");
    }

    #[test]
    fn test_age_garbage_keeps_three_digits() {
        let today = date(2024, 1, 1);
        assert_eq!(normalize_age_at("45 anos", today), "45");
        assert_eq!(normalize_age_at("1500", today), "150");
    }

    #[test]
    fn test_age_two_digit_birth_year() {
        let today = date(2024, 1, 1);
        assert_eq!(normalize_age_at("10/05/80", today), "43");
        assert_eq!(normalize_age_at("10/05/15", today), "8");
        assert_eq!(normalize_age_at("01/01/24", today), "0");
        assert_eq!(normalize_age_at("80-05-10", today), "");
    }

    #[test]
    fn test_age_impossible_dates_are_empty() {
        let today = date(2024, 1, 1);
        assert_eq!(normalize_age_at("31/02/1990", today), "");
        assert_eq!(normalize_age_at("10/13/1990", today), "");
        assert_eq!(normalize_age_at("01/01/1700", today), "");
    }

    #[test]
    fn test_sex() {
        assert_eq!(normalize_sex("M"), "M");
        assert_eq!(normalize_sex(" feminino "), "F");
        assert_eq!(normalize_sex("Masculino"), "M");
        assert_eq!(normalize_sex("i"), "I");
        assert_eq!(normalize_sex(""), "");
    }

    #[test]
    fn test_full_date() {
        assert_eq!(normalize_full_date("20230925", "202309"), "20230925");
        assert_eq!(normalize_full_date("25/09/2023", "202309"), "20230925");
        assert_eq!(normalize_full_date("2023-9-5", "202309"), "20230905");
        assert_eq!(normalize_full_date("5.9.2023", "202309"), "20230905");
        assert_eq!(normalize_full_date("", "202309"), "20230901");
        assert_eq!(normalize_full_date("ontem", "202309"), "20230901");
    }

    #[test]
    fn test_procedure_context_sensitive() {
        assert_eq!(normalize_procedure("Sutura", "BPA ENFERMAGEM"), "0401010066");
        assert_eq!(normalize_procedure("SUTURA", "BPA MEDICO"), "0401010058");
        assert_eq!(normalize_procedure("SUTURA", ""), "0401010058");
    }

    #[test]
    fn test_procedure_falls_back_to_other_dictionaries_then_digits() {
        assert_eq!(
            normalize_procedure("Coleta externa de leite materno (por doadora)", "BPA MEDICO"),
            "0101040032"
        );
        assert_eq!(normalize_procedure("03.01.01.007-2", "BPA MEDICO"), "0301010072");
        assert_eq!(normalize_procedure("   ", "BPA MEDICO"), "");
    }
}

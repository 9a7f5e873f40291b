//! Field-level MRZ semantics: filler stripping, country normalization,
//! check digits and two-digit-year dates.

use chrono::{Datelike, NaiveDate};
use scanrelay_core::constants::{EXPIRY_CENTURY_PIVOT, MRZ_FILLER};

/// Replace filler characters with blanks and trim.
pub fn strip_filler(raw: &str) -> String {
    raw.replace(MRZ_FILLER, " ").trim().to_string()
}

/// Expand legacy single-letter country codes to ISO 3166 alpha-3.
///
/// Only Germany ever used a single letter (`D`) in machine readable zones.
pub fn normalize_country(code: &str) -> String {
    match code.trim() {
        "D" => "DEU".to_string(),
        other => other.to_string(),
    }
}

/// ICAO 9303 check digit (weights 7, 3, 1) over `data`.
///
/// Digits count as their value, `A`..`Z` as 10..35 and the filler as 0.
/// Returns `None` if `data` contains any other character.
pub fn check_digit(data: &str) -> Option<u8> {
    const WEIGHTS: [u32; 3] = [7, 3, 1];

    let mut sum = 0u32;
    for (i, c) in data.chars().enumerate() {
        let value = match c {
            '0'..='9' => c as u32 - '0' as u32,
            'A'..='Z' => c as u32 - 'A' as u32 + 10,
            MRZ_FILLER => 0,
            _ => return None,
        };
        sum += value * WEIGHTS[i % 3];
    }
    Some((sum % 10) as u8)
}

/// Value of a check-digit character; the filler counts as zero.
pub fn check_digit_value(c: char) -> Option<u8> {
    match c {
        '0'..='9' => Some(c as u8 - b'0'),
        MRZ_FILLER => Some(0),
        _ => None,
    }
}

/// Parse a `YYMMDD` birth date.
///
/// Years up to `today.year() % 100` are in the 2000s, later ones in the 1900s.
pub fn parse_birth_date(token: &str, today: NaiveDate) -> Option<NaiveDate> {
    let (yy, month, day) = split_yymmdd(token)?;
    let pivot = (today.year().rem_euclid(100)) as u32;
    let century = if yy <= pivot { 2000 } else { 1900 };
    NaiveDate::from_ymd_opt((century + yy) as i32, month, day)
}

/// Parse a `YYMMDD` expiration date.
///
/// Years below 50 are in the 2000s, the rest in the 1900s.
pub fn parse_expiry_date(token: &str) -> Option<NaiveDate> {
    let (yy, month, day) = split_yymmdd(token)?;
    let century = if yy < EXPIRY_CENTURY_PIVOT { 2000 } else { 1900 };
    NaiveDate::from_ymd_opt((century + yy) as i32, month, day)
}

fn split_yymmdd(token: &str) -> Option<(u32, u32, u32)> {
    let token = token.trim();
    if token.len() != 6 || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let yy = token[0..2].parse().ok()?;
    let mm = token[2..4].parse().ok()?;
    let dd = token[4..6].parse().ok()?;
    Some((yy, mm, dd))
}

use std::str::FromStr;

use num_bigint::BigInt;
use num_traits::ToPrimitive;

/// Number of bits required to store a non-negative `int`.
pub fn bitsize(int: &BigInt) -> u64 {
    int.bits()
}

/// Parses a decimal literal made only of ASCII digits.
///
/// Literals of any length are accepted so that the caller can report
/// the exact width instead of an overflow.
pub fn parse_nat(token: &str) -> Option<BigInt> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    BigInt::from_str(token).ok()
}

/// Narrows a literal to `bits` width, returning `None` if it does not fit.
pub fn fit_uint(int: &BigInt, bits: u8) -> Option<u32> {
    if bitsize(int) > bits as u64 {
        return None;
    }
    int.to_u32()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nat_literals() {
        assert_eq!(parse_nat("0"), Some(BigInt::from(0)));
        assert_eq!(parse_nat("00042"), Some(BigInt::from(42)));
        assert!(parse_nat("").is_none());
        assert!(parse_nat("12a").is_none());
        assert!(parse_nat("-1").is_none());
        assert!(parse_nat("123123123123123123123123123").is_some());
    }

    #[test]
    fn fits() {
        let max16 = parse_nat("65535").unwrap();
        assert_eq!(fit_uint(&max16, 16), Some(0xffff));

        let over16 = parse_nat("65536").unwrap();
        assert_eq!(fit_uint(&over16, 16), None);
        assert_eq!(fit_uint(&over16, 24), Some(0x10000));

        let huge = parse_nat("99999999999999999999").unwrap();
        assert_eq!(fit_uint(&huge, 24), None);
        assert_eq!(bitsize(&BigInt::from(0)), 0);
    }
}

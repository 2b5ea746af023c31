use ibig::IBig;

/// helper macro to include test files
#[macro_export]
macro_rules! include_test_file {
    ($file_name:literal) => {
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../test-files/",
            $file_name
        ))
    };
}

/// Converts `value` into `width` little-endian bytes (two's complement).
///
/// Returns `None` when the value does not fit, accepting the full
/// signed-or-unsigned range for the width: `-(2^(8w-1)) ..= 2^(8w) - 1`.
pub fn ibig_to_le_bytes(value: &IBig, width: usize) -> Option<Vec<u8>> {
    let bits = width * 8;
    let min = -(IBig::from(1) << (bits - 1));
    let max = (IBig::from(1) << bits) - 1;
    if *value < min || *value > max {
        return None;
    }

    let mut bytes = Vec::with_capacity(width);
    for i in 0..width {
        let byte: u8 = (value >> (i * 8)) & 0xFFu8;
        bytes.push(byte);
    }
    Some(bytes)
}

#[test]
fn test_le_bytes() {
    assert_eq!(ibig_to_le_bytes(&IBig::from(0x1234), 2), Some(vec![0x34, 0x12]));
    assert_eq!(ibig_to_le_bytes(&IBig::from(-1), 1), Some(vec![0xFF]));
    assert_eq!(ibig_to_le_bytes(&IBig::from(255), 1), Some(vec![0xFF]));
    assert_eq!(ibig_to_le_bytes(&IBig::from(256), 1), None);
    assert_eq!(ibig_to_le_bytes(&IBig::from(-129), 1), None);
    assert_eq!(ibig_to_le_bytes(&IBig::from(0xFFFF), 2), Some(vec![0xFF, 0xFF]));
    assert_eq!(ibig_to_le_bytes(&IBig::from(0x10000), 2), None);
}

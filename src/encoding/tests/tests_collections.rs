#[cfg(test)]
mod tests {
    use crate::encoding::{
        Decode, Encode, EncodingError, decode_from_slice, decode_vec, encode_to_vec, encode_vec,
    };

    #[test]
    fn byte_vectors_round_trip() {
        let value = b"concordkv".to_vec();
        let bytes = encode_to_vec(&value).unwrap();
        // [u32 len][bytes]
        assert_eq!(bytes.len(), 4 + value.len());
        let (decoded, consumed) = decode_from_slice::<Vec<u8>>(&bytes).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn empty_byte_vector_round_trips() {
        let bytes = encode_to_vec(&Vec::<u8>::new()).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0]);
        let (decoded, _) = decode_from_slice::<Vec<u8>>(&bytes).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn borrowed_slice_matches_owned_encoding() {
        let owned = encode_to_vec(&b"key".to_vec()).unwrap();
        let borrowed = encode_to_vec(&b"key".as_slice()).unwrap();
        assert_eq!(owned, borrowed);
    }

    #[test]
    fn strings_round_trip_and_reject_bad_utf8() {
        let value = "ключ".to_string();
        let bytes = encode_to_vec(&value).unwrap();
        let (decoded, _) = decode_from_slice::<String>(&bytes).unwrap();
        assert_eq!(decoded, value);

        // 0xFF is never valid UTF-8.
        let mut bad = Vec::new();
        2u32.encode_to(&mut bad).unwrap();
        bad.extend_from_slice(&[0xFF, 0xFF]);
        assert!(matches!(
            String::decode_from(&bad).unwrap_err(),
            EncodingError::InvalidUtf8(_)
        ));
    }

    #[test]
    fn options_round_trip() {
        let some: Option<u64> = Some(42);
        let none: Option<u64> = None;

        let bytes = encode_to_vec(&some).unwrap();
        assert_eq!(bytes[0], 1);
        let (decoded, _) = decode_from_slice::<Option<u64>>(&bytes).unwrap();
        assert_eq!(decoded, some);

        let bytes = encode_to_vec(&none).unwrap();
        assert_eq!(bytes, vec![0]);
        let (decoded, _) = decode_from_slice::<Option<u64>>(&bytes).unwrap();
        assert_eq!(decoded, none);
    }

    #[test]
    fn struct_vectors_round_trip() {
        let values: Vec<u64> = vec![1, 1 << 20, u64::MAX];
        let mut buf = Vec::new();
        encode_vec(&values, &mut buf).unwrap();
        let (decoded, consumed) = decode_vec::<u64>(&buf).unwrap();
        assert_eq!(decoded, values);
        assert_eq!(consumed, buf.len());
    }
}

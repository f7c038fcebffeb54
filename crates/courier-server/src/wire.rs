//! CBOR encoding of sealed bodies and wrapped keys.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::DeliveryError;

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, DeliveryError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|err| DeliveryError::Encoding(err.to_string()))?;
    Ok(bytes)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DeliveryError> {
    ciborium::from_reader(bytes).map_err(|err| DeliveryError::Encoding(err.to_string()))
}

#[cfg(test)]
mod tests {
    use courier_crypto::SealedContent;

    use super::*;

    #[test]
    fn sealed_body_survives_encoding() {
        let sealed = SealedContent { nonce: [9; 24], ciphertext: vec![1, 2, 3] };
        let bytes = encode(&sealed).expect("encode");
        assert_eq!(decode::<SealedContent>(&bytes).expect("decode"), sealed);
    }

    #[test]
    fn garbage_is_an_encoding_error() {
        let result = decode::<SealedContent>(&[0xff, 0x00]);
        assert!(matches!(result, Err(DeliveryError::Encoding(_))));
    }
}

use serde::de::Error as DeError;
use serde::{Deserialize, Serialize};
use serde::{Deserializer, Serializer};

/// Byte payload carried over json-rpc as a base64 string, used for proof image uploads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Byte(pub Vec<u8>);

impl Base64Byte {
    pub fn new(data: Vec<u8>) -> Self {
        Base64Byte(data)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Base64Byte> for Vec<u8> {
    fn from(val: Base64Byte) -> Self {
        val.0
    }
}

impl Serialize for Base64Byte {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(base64::encode(&self.0).as_str())
    }
}

impl<'de> Deserialize<'de> for Base64Byte {
    fn deserialize<D>(deserializer: D) -> Result<Base64Byte, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes_str = <String>::deserialize(deserializer)?;
        base64::decode(bytes_str)
            .map(Base64Byte)
            .map_err(|e| D::Error::custom(format!("invalid base64 payload: {}", e)))
    }
}

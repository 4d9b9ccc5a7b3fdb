//! The closed value-type enumeration shared by manifests and the JIT.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of a method parameter or return value.
///
/// The set is closed: language modules marshal everything through these
/// types. Arrays are one-dimensional and spelled with a `[]` suffix in
/// manifests (`"int32[]"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    #[serde(rename = "void")]
    Void,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "char8")]
    Char8,
    #[serde(rename = "char16")]
    Char16,
    #[serde(rename = "int8")]
    Int8,
    #[serde(rename = "int16")]
    Int16,
    #[serde(rename = "int32")]
    Int32,
    #[serde(rename = "int64")]
    Int64,
    #[serde(rename = "uint8")]
    UInt8,
    #[serde(rename = "uint16")]
    UInt16,
    #[serde(rename = "uint32")]
    UInt32,
    #[serde(rename = "uint64")]
    UInt64,
    #[serde(rename = "ptr64")]
    Pointer,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "double")]
    Double,
    #[serde(rename = "function")]
    Function,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "any")]
    Any,
    #[serde(rename = "bool[]")]
    ArrayBool,
    #[serde(rename = "char8[]")]
    ArrayChar8,
    #[serde(rename = "char16[]")]
    ArrayChar16,
    #[serde(rename = "int8[]")]
    ArrayInt8,
    #[serde(rename = "int16[]")]
    ArrayInt16,
    #[serde(rename = "int32[]")]
    ArrayInt32,
    #[serde(rename = "int64[]")]
    ArrayInt64,
    #[serde(rename = "uint8[]")]
    ArrayUInt8,
    #[serde(rename = "uint16[]")]
    ArrayUInt16,
    #[serde(rename = "uint32[]")]
    ArrayUInt32,
    #[serde(rename = "uint64[]")]
    ArrayUInt64,
    #[serde(rename = "ptr64[]")]
    ArrayPointer,
    #[serde(rename = "float[]")]
    ArrayFloat,
    #[serde(rename = "double[]")]
    ArrayDouble,
    #[serde(rename = "string[]")]
    ArrayString,
    #[serde(rename = "any[]")]
    ArrayAny,
    #[serde(rename = "vec2[]")]
    ArrayVector2,
    #[serde(rename = "vec3[]")]
    ArrayVector3,
    #[serde(rename = "vec4[]")]
    ArrayVector4,
    #[serde(rename = "mat4x4[]")]
    ArrayMatrix4x4,
    #[serde(rename = "vec2")]
    Vector2,
    #[serde(rename = "vec3")]
    Vector3,
    #[serde(rename = "vec4")]
    Vector4,
    #[serde(rename = "mat4x4")]
    Matrix4x4,
}

impl ValueType {
    /// Manifest spelling of this type.
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Void => "void",
            ValueType::Bool => "bool",
            ValueType::Char8 => "char8",
            ValueType::Char16 => "char16",
            ValueType::Int8 => "int8",
            ValueType::Int16 => "int16",
            ValueType::Int32 => "int32",
            ValueType::Int64 => "int64",
            ValueType::UInt8 => "uint8",
            ValueType::UInt16 => "uint16",
            ValueType::UInt32 => "uint32",
            ValueType::UInt64 => "uint64",
            ValueType::Pointer => "ptr64",
            ValueType::Float => "float",
            ValueType::Double => "double",
            ValueType::Function => "function",
            ValueType::String => "string",
            ValueType::Any => "any",
            ValueType::ArrayBool => "bool[]",
            ValueType::ArrayChar8 => "char8[]",
            ValueType::ArrayChar16 => "char16[]",
            ValueType::ArrayInt8 => "int8[]",
            ValueType::ArrayInt16 => "int16[]",
            ValueType::ArrayInt32 => "int32[]",
            ValueType::ArrayInt64 => "int64[]",
            ValueType::ArrayUInt8 => "uint8[]",
            ValueType::ArrayUInt16 => "uint16[]",
            ValueType::ArrayUInt32 => "uint32[]",
            ValueType::ArrayUInt64 => "uint64[]",
            ValueType::ArrayPointer => "ptr64[]",
            ValueType::ArrayFloat => "float[]",
            ValueType::ArrayDouble => "double[]",
            ValueType::ArrayString => "string[]",
            ValueType::ArrayAny => "any[]",
            ValueType::ArrayVector2 => "vec2[]",
            ValueType::ArrayVector3 => "vec3[]",
            ValueType::ArrayVector4 => "vec4[]",
            ValueType::ArrayMatrix4x4 => "mat4x4[]",
            ValueType::Vector2 => "vec2",
            ValueType::Vector3 => "vec3",
            ValueType::Vector4 => "vec4",
            ValueType::Matrix4x4 => "mat4x4",
        }
    }

    /// One-dimensional array variant.
    pub fn is_array(self) -> bool {
        matches!(
            self,
            ValueType::ArrayBool
                | ValueType::ArrayChar8
                | ValueType::ArrayChar16
                | ValueType::ArrayInt8
                | ValueType::ArrayInt16
                | ValueType::ArrayInt32
                | ValueType::ArrayInt64
                | ValueType::ArrayUInt8
                | ValueType::ArrayUInt16
                | ValueType::ArrayUInt32
                | ValueType::ArrayUInt64
                | ValueType::ArrayPointer
                | ValueType::ArrayFloat
                | ValueType::ArrayDouble
                | ValueType::ArrayString
                | ValueType::ArrayAny
                | ValueType::ArrayVector2
                | ValueType::ArrayVector3
                | ValueType::ArrayVector4
                | ValueType::ArrayMatrix4x4
        )
    }

    /// Integer-class scalar (bool and chars marshal as integers).
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            ValueType::Bool
                | ValueType::Char8
                | ValueType::Char16
                | ValueType::Int8
                | ValueType::Int16
                | ValueType::Int32
                | ValueType::Int64
                | ValueType::UInt8
                | ValueType::UInt16
                | ValueType::UInt32
                | ValueType::UInt64
        )
    }

    /// Floating-point scalar.
    pub fn is_floating(self) -> bool {
        matches!(self, ValueType::Float | ValueType::Double)
    }

    /// Aggregate passed by pointer when used as an argument.
    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            ValueType::Vector2 | ValueType::Vector3 | ValueType::Vector4 | ValueType::Matrix4x4
        ) || self.is_array()
            || matches!(self, ValueType::String | ValueType::Any)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_names_round_trip() {
        for ty in [
            ValueType::Void,
            ValueType::Bool,
            ValueType::Int32,
            ValueType::UInt64,
            ValueType::Pointer,
            ValueType::Float,
            ValueType::String,
            ValueType::ArrayInt32,
            ValueType::ArrayMatrix4x4,
            ValueType::Vector2,
            ValueType::Matrix4x4,
        ] {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty.name()));
            let back: ValueType = serde_json::from_str(&json).unwrap();
            assert_eq!(back, ty);
        }
    }

    #[test]
    fn test_classification() {
        assert!(ValueType::Int64.is_integral());
        assert!(ValueType::Bool.is_integral());
        assert!(!ValueType::Float.is_integral());
        assert!(ValueType::Double.is_floating());
        assert!(ValueType::ArrayVector2.is_array());
        assert!(ValueType::Matrix4x4.is_aggregate());
        assert!(ValueType::String.is_aggregate());
        assert!(!ValueType::Int32.is_aggregate());
    }
}

use crate::error::TemplateError;
use crate::model::value::Value;
use serde::Serialize;
use serde::ser::*;

use std::collections::BTreeMap;

/// 将任意 `Serialize` 类型转换为模板 `Value`
pub struct ValueSerializer;

impl Serializer for ValueSerializer {
    type Ok = Value;
    type Error = TemplateError;
    type SerializeSeq = ListSerializer;
    type SerializeTuple = ListSerializer;
    type SerializeTupleStruct = ListSerializer;
    type SerializeTupleVariant = ListSerializer;
    type SerializeMap = MapSerializer;
    type SerializeStruct = MapSerializer;
    type SerializeStructVariant = MapSerializer;

    fn serialize_bool(self, v: bool) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Bool(v))
    }
    fn serialize_i8(self, v: i8) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Int(v as i64))
    }
    fn serialize_i16(self, v: i16) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Int(v as i64))
    }
    fn serialize_i32(self, v: i32) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Int(v as i64))
    }
    fn serialize_i64(self, v: i64) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Int(v))
    }
    fn serialize_u8(self, v: u8) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Int(v as i64))
    }
    fn serialize_u16(self, v: u16) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Int(v as i64))
    }
    fn serialize_u32(self, v: u32) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Int(v as i64))
    }
    fn serialize_u64(self, v: u64) -> Result<Self::Ok, Self::Error> {
        match i64::try_from(v) {
            Ok(i) => Ok(Value::Int(i)),
            Err(_) => Ok(Value::Float(v as f64)),
        }
    }
    fn serialize_f32(self, v: f32) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Float(v as f64))
    }
    fn serialize_f64(self, v: f64) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Float(v))
    }
    fn serialize_char(self, v: char) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Str(v.to_string()))
    }
    fn serialize_str(self, v: &str) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Str(v.to_string()))
    }
    fn serialize_bytes(self, v: &[u8]) -> Result<Self::Ok, Self::Error> {
        Ok(Value::List(v.iter().map(|b| Value::Int(*b as i64)).collect()))
    }
    fn serialize_none(self) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Null)
    }
    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Self::Ok, Self::Error> {
        value.serialize(self)
    }
    fn serialize_unit(self) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Null)
    }
    fn serialize_unit_struct(self, _: &'static str) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Null)
    }
    fn serialize_unit_variant(
        self,
        _: &'static str,
        _: u32,
        variant: &'static str,
    ) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Str(variant.to_string()))
    }
    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        value: &T,
    ) -> Result<Self::Ok, Self::Error> {
        value.serialize(self)
    }
    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> Result<Self::Ok, Self::Error> {
        value.serialize(self)
    }
    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq, Self::Error> {
        Ok(ListSerializer {
            vec: Vec::with_capacity(len.unwrap_or(0)),
        })
    }
    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple, Self::Error> {
        self.serialize_seq(Some(len))
    }
    fn serialize_tuple_struct(
        self,
        _: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleStruct, Self::Error> {
        self.serialize_seq(Some(len))
    }
    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleVariant, Self::Error> {
        self.serialize_seq(Some(len))
    }
    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, Self::Error> {
        Ok(MapSerializer {
            map: BTreeMap::new(),
            key: None,
        })
    }
    fn serialize_struct(
        self,
        _: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, Self::Error> {
        Ok(MapSerializer {
            map: BTreeMap::new(),
            key: None,
        })
    }
    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, Self::Error> {
        Ok(MapSerializer {
            map: BTreeMap::new(),
            key: None,
        })
    }
}

pub struct ListSerializer {
    vec: Vec<Value>,
}

macro_rules! impl_serialize_seq {
    ($trait:ident, $method:ident) => {
        impl $trait for ListSerializer {
            type Ok = Value;
            type Error = TemplateError;

            fn $method<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
                self.vec.push(value.serialize(ValueSerializer)?);
                Ok(())
            }

            fn end(self) -> Result<Self::Ok, Self::Error> {
                Ok(Value::List(self.vec))
            }
        }
    };
}

impl_serialize_seq!(SerializeSeq, serialize_element);
impl_serialize_seq!(SerializeTuple, serialize_element);
impl_serialize_seq!(SerializeTupleStruct, serialize_field);
impl_serialize_seq!(SerializeTupleVariant, serialize_field);

pub struct MapSerializer {
    map: BTreeMap<String, Value>,
    key: Option<String>,
}

impl SerializeMap for MapSerializer {
    type Ok = Value;
    type Error = TemplateError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), Self::Error> {
        // 数字、布尔键按字符串处理
        match key.serialize(ValueSerializer)? {
            Value::Str(s) => self.key = Some(s),
            k @ (Value::Int(_) | Value::Float(_) | Value::Bool(_)) => {
                self.key = Some(k.to_string())
            }
            other => {
                return Err(TemplateError::Configuration(format!(
                    "map key must be a string, got {}",
                    other.type_name()
                )));
            }
        }
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        let v = value.serialize(ValueSerializer)?;
        let key = self
            .key
            .take()
            .ok_or_else(|| TemplateError::Configuration("missing key for map value".into()))?;
        self.map.insert(key, v);
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(Value::Map(self.map))
    }
}

macro_rules! impl_serialize_struct {
    ($trait:ident) => {
        impl $trait for MapSerializer {
            type Ok = Value;
            type Error = TemplateError;

            fn serialize_field<T: ?Sized + Serialize>(
                &mut self,
                key: &'static str,
                value: &T,
            ) -> Result<(), Self::Error> {
                let v = value.serialize(ValueSerializer)?;
                self.map.insert(key.to_string(), v);
                Ok(())
            }

            fn end(self) -> Result<Self::Ok, Self::Error> {
                Ok(Value::Map(self.map))
            }
        }
    };
}

impl_serialize_struct!(SerializeStruct);
impl_serialize_struct!(SerializeStructVariant);

pub fn to_value<T: Serialize + ?Sized>(t: &T) -> Result<Value, TemplateError> {
    t.serialize(ValueSerializer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Serialize)]
    struct User {
        name: String,
        age: u8,
        tags: Vec<&'static str>,
        nick: Option<String>,
    }

    #[test]
    fn test_struct_to_map() {
        let user = User {
            name: "tom".into(),
            age: 18,
            tags: vec!["a", "b"],
            nick: None,
        };
        let v = to_value(&user).unwrap();
        assert_eq!(v.get("name"), Value::from("tom"));
        assert_eq!(v.get("age"), Value::Int(18));
        assert_eq!(v.get("tags"), Value::from(vec!["a", "b"]));
        assert_eq!(v.get("nick"), Value::Null);
    }

    #[test]
    fn test_integer_map_keys() {
        let mut m = HashMap::new();
        m.insert(1, "one");
        let v = to_value(&m).unwrap();
        assert_eq!(v.get("1"), Value::from("one"));
    }

    #[test]
    fn test_unit_is_null() {
        assert_eq!(to_value(&()).unwrap(), Value::Null);
    }
}

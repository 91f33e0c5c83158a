mod jade_model;
pub mod serializer;
pub mod value;

pub use jade_model::Model;
pub use serializer::to_value;
pub use value::Value;

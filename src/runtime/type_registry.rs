//! Registry of sample types known to a context
//!
//! The registry maps type names to [`SampleType`] handles so embedders can
//! resolve types from graph descriptions and register their own object
//! types. It is owned by the context that uses it; nothing here touches
//! process-global state, so multiple contexts with different type sets can
//! coexist in one process.

use std::collections::HashMap;

use super::errors::FlowError;
use super::sample::{ObjectType, SampleType};

pub struct TypeRegistry {
    types: HashMap<String, SampleType>,
}

impl TypeRegistry {
    /// Create a registry pre-populated with the fixed primitive types.
    pub fn new() -> Self {
        let mut types = HashMap::new();
        for ty in [
            SampleType::Complex32,
            SampleType::Float32,
            SampleType::Bit,
            SampleType::Byte,
        ] {
            types.insert(ty.name().to_string(), ty);
        }
        Self { types }
    }

    /// Register an embedder-defined object type. The name must be unique.
    pub fn register_object(&mut self, ty: ObjectType) -> Result<SampleType, FlowError> {
        let name = ty.name().to_string();
        if self.types.contains_key(&name) {
            return Err(FlowError::DuplicateType(name));
        }
        let handle = SampleType::object(ty);
        self.types.insert(name, handle.clone());
        Ok(handle)
    }

    /// Look up a sample type by name.
    pub fn lookup(&self, name: &str) -> Option<&SampleType> {
        self.types.get(name)
    }

    /// All registered type names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_preregistered() {
        let reg = TypeRegistry::new();
        assert_eq!(reg.lookup("Float32"), Some(&SampleType::Float32));
        assert_eq!(reg.lookup("Complex32"), Some(&SampleType::Complex32));
        assert_eq!(reg.lookup("Bit"), Some(&SampleType::Bit));
        assert_eq!(reg.lookup("Byte"), Some(&SampleType::Byte));
        assert_eq!(reg.lookup("Frame"), None);
    }

    #[test]
    fn object_registration() {
        let mut reg = TypeRegistry::new();
        let handle = reg
            .register_object(ObjectType::new("Frame", |p| format!("{} bytes", p.len())))
            .unwrap();
        assert!(!handle.is_fixed());
        assert_eq!(reg.lookup("Frame"), Some(&handle));

        let dup = reg.register_object(ObjectType::new("Frame", |_| String::new()));
        assert!(matches!(dup, Err(FlowError::DuplicateType(name)) if name == "Frame"));
    }
}

use std::any::Any;
use std::fmt::Debug;

/// The object-safe surface behind [`Value`].
///
/// Implemented for every `'static` payload that is `Debug + Clone`, so any
/// such type can be erased without writing an impl by hand.
pub trait ErasedValue: Any + Debug {
    /// Produces an independently owned copy of the same concrete type.
    fn clone_value(&self) -> Box<dyn ErasedValue>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<V> ErasedValue for V
where
    V: Any + Debug + Clone,
{
    fn clone_value(&self) -> Box<dyn ErasedValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A type-erased, cloneable payload.
///
/// The cache and the modal state store heterogeneous payloads through this
/// box. Code holding a `Value` never branches on the concrete type; callers
/// that know what they stored reconstitute it with [`Value::downcast_ref`].
#[derive(Debug)]
pub struct Value(Box<dyn ErasedValue>);

impl Value {
    /// Erases an owned payload.
    pub fn new<V>(payload: V) -> Self
    where
        V: Any + Debug + Clone,
    {
        Self(Box::new(payload))
    }

    /// Borrows the payload as `V`, or `None` if the concrete type differs.
    #[must_use]
    pub fn downcast_ref<V: Any>(&self) -> Option<&V> {
        self.0.as_any().downcast_ref()
    }

    /// Exclusively borrows the payload as `V`, or `None` on a type mismatch.
    pub fn downcast_mut<V: Any>(&mut self) -> Option<&mut V> {
        self.0.as_any_mut().downcast_mut()
    }
}

impl Clone for Value {
    fn clone(&self) -> Self {
        Self(self.0.clone_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_roundtrip() {
        let value = Value::new(42_i32);

        assert_eq!(value.downcast_ref::<i32>(), Some(&42));
        assert_eq!(value.downcast_ref::<f64>(), None);
    }

    #[test]
    fn downcast_mut_writes_through() {
        let mut value = Value::new(String::from("before"));

        *value.downcast_mut::<String>().unwrap() = String::from("after");

        assert_eq!(value.downcast_ref::<String>().unwrap(), "after");
    }

    #[test]
    fn clone_is_independent() {
        let original = Value::new(vec![1, 2, 3]);
        let mut clone = original.clone();

        clone.downcast_mut::<Vec<i32>>().unwrap().push(4);

        assert_eq!(original.downcast_ref::<Vec<i32>>().unwrap(), &[1, 2, 3]);
        assert_eq!(clone.downcast_ref::<Vec<i32>>().unwrap(), &[1, 2, 3, 4]);
    }
}

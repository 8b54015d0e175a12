use crate::value::Value;

/// The modal sub-state of a context: an ordered sequence of type-erased
/// values, typically integer or enumerated mode variables.
#[derive(Debug, Clone, Default)]
pub struct ModalState {
    values: Vec<Value>,
}

impl ModalState {
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn num_variables(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn value_mut(&mut self, index: usize) -> Option<&mut Value> {
        self.values.get_mut(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_addressable_by_slot() {
        let mut xm = ModalState::new(vec![Value::new(1_u8), Value::new("phase")]);

        *xm.value_mut(0).unwrap().downcast_mut::<u8>().unwrap() = 2;

        assert_eq!(xm.value(0).unwrap().downcast_ref::<u8>(), Some(&2));
        assert_eq!(xm.value(1).unwrap().downcast_ref::<&str>(), Some(&"phase"));
        assert!(xm.value(2).is_none());
    }
}

//! Named interface only (§6): the paint/widget layer is out of scope for
//! the core. This trait exists so a caller can type-check against "a
//! widget" without the core depending on any particular UI toolkit.

use crate::style::Style;

pub trait Widget {
    fn id(&self) -> loom_signal::ObjectId;
    fn style(&self) -> &dyn Style;
}

#[cfg(test)]
pub(crate) mod test_double {
    use super::*;
    use crate::style::test_double::NullStyle;

    pub struct NullWidget {
        id: loom_signal::ObjectId,
        style: NullStyle,
    }

    impl NullWidget {
        pub fn new() -> Self {
            Self {
                id: loom_signal::ObjectId::new(),
                style: NullStyle,
            }
        }
    }

    impl Widget for NullWidget {
        fn id(&self) -> loom_signal::ObjectId {
            self.id
        }

        fn style(&self) -> &dyn Style {
            &self.style
        }
    }

    #[test]
    fn null_widget_type_checks_as_a_widget() {
        let widget = NullWidget::new();
        let _: &dyn Widget = &widget;
    }
}

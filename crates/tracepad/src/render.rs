//! Textual rendering of probed variables.
//!
//! Probes may reference values of any type, so rendering cannot require a
//! trait bound. [`Capture`] picks the best available representation at the
//! call site through method resolution:
//!
//! - types implementing [`Debug`] render with `{:?}`;
//! - every other type renders as `<type name>`.
//!
//! The [`probe!`](crate::probe) macro calls `(&&Capture(&value)).render()`.
//! The [`ViaDebug`] impl sits one reference level closer to that receiver,
//! so it wins whenever it applies and [`ViaTypeName`] is only reached after
//! an auto-deref.

use std::fmt::Debug;

/// Borrowed value waiting to be rendered.
pub struct Capture<'a, T: ?Sized>(pub &'a T);

/// Rendering for values whose type implements [`Debug`].
pub trait ViaDebug {
    fn render(&self) -> String;
}

impl<T: Debug + ?Sized> ViaDebug for &Capture<'_, T> {
    fn render(&self) -> String {
        format!("{:?}", self.0)
    }
}

/// Fallback rendering that only names the value's type.
pub trait ViaTypeName {
    fn render(&self) -> String;
}

impl<T: ?Sized> ViaTypeName for Capture<'_, T> {
    fn render(&self) -> String {
        format!("<{}>", std::any::type_name::<T>())
    }
}

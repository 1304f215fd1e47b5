//! Resource types of external controllers the app-controller creates objects for.

pub mod knative;

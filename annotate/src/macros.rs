/// Marks a region that spans the rest of the enclosing scope
///
/// # Examples
///
/// ```rust,ignore
/// use vernier_annotate::region_scope;
///
/// fn solve() {
///     region_scope!("function", "solve");
///     // region ends when the guard leaves scope
/// }
/// ```
#[macro_export]
macro_rules! region_scope {
    ($attr:expr, $value:expr) => {
        let _vernier_region_guard = $crate::guards::ScopeGuard::new($attr, $value);
    };
}

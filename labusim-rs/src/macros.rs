/// Rewrites an async fn into the boxed-future fn the suite registry stores.
///
/// Test bodies are plain fn pointers, so they cannot be `async fn` directly;
/// this wraps the body in `Box::pin(async move { .. })` with the right
/// signature.
#[macro_export]
macro_rules! dyn_async {
    ($(#[$attr:meta])* $vis:vis async fn $name:ident<$lt:lifetime>($($args:tt)*) $body:block) => {
        $(#[$attr])*
        $vis fn $name<$lt>($($args)*) -> ::core::pin::Pin<
            ::std::boxed::Box<dyn ::core::future::Future<Output = ()> + ::core::marker::Send + $lt>,
        > {
            ::std::boxed::Box::pin(async move $body)
        }
    };
}

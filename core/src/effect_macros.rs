//! Declarative macros for building effects inside reducers.

/// Create an `Effect::Future` from an async block body.
///
/// The body is moved into an `async move` block and must evaluate to
/// `Option<Action>`.
///
/// # Example
///
/// ```rust,ignore
/// use staybook_core::async_effect;
///
/// async_effect! {
///     match listings.reserve_rooms(reservation).await {
///         Ok(remaining) => Some(InventoryAction::RoomsReserved { reservation, remaining }),
///         Err(error) => Some(InventoryAction::InventoryRejected { error }),
///     }
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(
            ::std::boxed::Box::pin(async move { $($body)* })
        )
    };
}

/// Create an `Effect::Delay` that dispatches an action later.
///
/// ```rust,ignore
/// delay! {
///     duration: Duration::from_secs(5),
///     action: SettlementAction::RetryRefund { booking_id }
/// }
/// ```
#[macro_export]
macro_rules! delay {
    (
        duration: $duration:expr,
        action: $action:expr
    ) => {
        $crate::effect::Effect::Delay {
            duration: $duration,
            action: ::std::boxed::Box::new($action),
        }
    };
}

//! Platform fee pricing.
//!
//! Amounts are computed exactly once, at booking creation, and persisted.
//! Later fee-rate changes never reprice existing bookings.

use rust_decimal::Decimal;

/// 8% platform fee on the service subtotal.
pub const PLATFORM_FEE_RATE: Decimal = Decimal::from_parts(8, 0, 0, false, 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingPrice {
    pub subtotal: Decimal,
    pub platform_fee: Decimal,
    pub total: Decimal,
}

/// Price a booking from the service subtotal. The fee is rounded to two
/// decimal places with banker's rounding before the total is formed, so the
/// persisted amounts always satisfy total = subtotal + fee exactly.
pub fn price_booking(subtotal: Decimal) -> BookingPrice {
    let platform_fee = (subtotal * PLATFORM_FEE_RATE).round_dp(2);
    BookingPrice {
        subtotal,
        platform_fee,
        total: subtotal + platform_fee,
    }
}

use serde::Serialize;

use crate::models::RefundType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefundQuote {
    pub fee_cents: i64,
    pub net_cents: i64,
}

/// Fee and net amount for refunding `refundable_cents`.
///
/// Organizer cancellations refund everything. Customer requests keep a
/// fixed processing fee; the net never goes below zero.
pub fn calculate_refund(refundable_cents: i64, refund_type: RefundType, fee_cents: i64) -> RefundQuote {
    let amount = refundable_cents.max(0);
    match refund_type {
        RefundType::FullCancellation => RefundQuote {
            fee_cents: 0,
            net_cents: amount,
        },
        RefundType::CustomerRequest => RefundQuote {
            fee_cents,
            net_cents: (amount - fee_cents).max(0),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cancellation_has_no_fee() {
        assert_eq!(
            calculate_refund(5000, RefundType::FullCancellation, 30),
            RefundQuote { fee_cents: 0, net_cents: 5000 }
        );
    }

    #[test]
    fn test_customer_request_keeps_fee() {
        assert_eq!(
            calculate_refund(5000, RefundType::CustomerRequest, 30),
            RefundQuote { fee_cents: 30, net_cents: 4970 }
        );
    }

    #[test]
    fn test_net_never_negative() {
        assert_eq!(calculate_refund(20, RefundType::CustomerRequest, 30).net_cents, 0);
        assert_eq!(calculate_refund(0, RefundType::FullCancellation, 30).net_cents, 0);
        assert_eq!(calculate_refund(-5, RefundType::FullCancellation, 30).net_cents, 0);
    }

    #[test]
    fn test_quote_is_consistent_across_amounts() {
        for amount in [0, 1, 29, 30, 31, 999, 5000, 1_000_000] {
            let full = calculate_refund(amount, RefundType::FullCancellation, 30);
            assert_eq!((full.fee_cents, full.net_cents), (0, amount));

            let customer = calculate_refund(amount, RefundType::CustomerRequest, 30);
            assert_eq!(customer.fee_cents, 30);
            assert_eq!(customer.net_cents, (amount - 30).max(0));
        }
    }
}

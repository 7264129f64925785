//! Availability checks and stock movement planning.

use serde::{Deserialize, Serialize};

use procura_core::{DomainError, DomainResult, ProductId};

/// A requested quantity of one product.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockRequest {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl StockRequest {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self { product_id, quantity }
    }
}

/// What the store knows about a product at check time.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StockSnapshot {
    pub product_id: ProductId,
    pub on_hand: u32,
    /// False for inactive products and products of shops not accepting orders.
    pub orderable: bool,
}

/// Signed change to a product's quantity-on-hand.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub product_id: ProductId,
    pub delta: i64,
}

impl StockAdjustment {
    /// New quantity-on-hand after this adjustment, refusing to go below zero.
    pub fn apply_to(&self, on_hand: u32) -> DomainResult<u32> {
        let next = i64::from(on_hand) + self.delta;
        if next < 0 {
            let requested = u32::try_from(-self.delta).unwrap_or(u32::MAX);
            return Err(DomainError::insufficient_stock(self.product_id, requested, on_hand));
        }
        u32::try_from(next).map_err(|_| {
            DomainError::invariant(format!("quantity overflow for product {}", self.product_id))
        })
    }
}

/// Collapse repeated products in a batch; the last entry for a product wins.
///
/// Order of first appearance is preserved.
pub fn merge_requests(requests: &[StockRequest]) -> Vec<StockRequest> {
    let mut merged: Vec<StockRequest> = Vec::with_capacity(requests.len());
    for request in requests {
        match merged.iter_mut().find(|r| r.product_id == request.product_id) {
            Some(existing) => existing.quantity = request.quantity,
            None => merged.push(*request),
        }
    }
    merged
}

/// Check a whole batch against current stock.
///
/// Either every request passes or the first failing one is reported; callers
/// apply nothing on error.
pub fn check_availability(requests: &[StockRequest], stock: &[StockSnapshot]) -> DomainResult<()> {
    for request in requests {
        let snapshot = stock
            .iter()
            .find(|s| s.product_id == request.product_id)
            .ok_or_else(|| DomainError::not_found(format!("product {}", request.product_id)))?;

        if !snapshot.orderable {
            return Err(DomainError::validation(format!(
                "product {} is not available for ordering",
                request.product_id
            )));
        }

        if request.quantity > snapshot.on_hand {
            return Err(DomainError::insufficient_stock(
                request.product_id,
                request.quantity,
                snapshot.on_hand,
            ));
        }
    }
    Ok(())
}

/// Plan the decrement of every line at finalize time.
///
/// Orderability is not re-checked here: the buyer already holds the lines,
/// only the quantity matters.
pub fn plan_commit(
    lines: &[StockRequest],
    stock: &[StockSnapshot],
) -> DomainResult<Vec<StockAdjustment>> {
    let lines = merge_quantities(lines);
    let mut adjustments = Vec::with_capacity(lines.len());
    for line in &lines {
        let on_hand = stock
            .iter()
            .find(|s| s.product_id == line.product_id)
            .map(|s| s.on_hand)
            .ok_or_else(|| DomainError::not_found(format!("product {}", line.product_id)))?;
        if line.quantity > on_hand {
            return Err(DomainError::insufficient_stock(line.product_id, line.quantity, on_hand));
        }
        adjustments.push(StockAdjustment {
            product_id: line.product_id,
            delta: -i64::from(line.quantity),
        });
    }
    Ok(adjustments)
}

/// Plan giving back the stock of previously committed lines.
pub fn plan_restore(lines: &[StockRequest]) -> Vec<StockAdjustment> {
    merge_quantities(lines)
        .into_iter()
        .filter(|l| l.quantity > 0)
        .map(|l| StockAdjustment {
            product_id: l.product_id,
            delta: i64::from(l.quantity),
        })
        .collect()
}

fn merge_quantities(lines: &[StockRequest]) -> Vec<StockRequest> {
    let mut merged: Vec<StockRequest> = Vec::with_capacity(lines.len());
    for line in lines {
        match merged.iter_mut().find(|r| r.product_id == line.product_id) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(line.quantity),
            None => merged.push(*line),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(n: i64) -> ProductId {
        ProductId::new(n)
    }

    fn snap(n: i64, on_hand: u32) -> StockSnapshot {
        StockSnapshot { product_id: pid(n), on_hand, orderable: true }
    }

    #[test]
    fn request_over_on_hand_is_rejected_with_product_identified() {
        let err = check_availability(&[StockRequest::new(pid(1), 6)], &[snap(1, 5)]).unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock(pid(1), 6, 5));
    }

    #[test]
    fn exact_on_hand_is_available() {
        assert!(check_availability(&[StockRequest::new(pid(1), 5)], &[snap(1, 5)]).is_ok());
    }

    #[test]
    fn second_item_failure_fails_the_batch() {
        let batch = [StockRequest::new(pid(1), 1), StockRequest::new(pid(2), 10)];
        let err = check_availability(&batch, &[snap(1, 5), snap(2, 3)]).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock { product_id, .. } if product_id == pid(2)));
    }

    #[test]
    fn unknown_product_is_not_found() {
        let err = check_availability(&[StockRequest::new(pid(9), 1)], &[snap(1, 5)]).unwrap_err();
        assert_eq!(err, DomainError::not_found("product 9"));
    }

    #[test]
    fn unorderable_product_is_rejected() {
        let mut s = snap(1, 5);
        s.orderable = false;
        assert!(matches!(
            check_availability(&[StockRequest::new(pid(1), 1)], &[s]),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn merge_keeps_last_quantity_and_first_position() {
        let merged = merge_requests(&[
            StockRequest::new(pid(1), 2),
            StockRequest::new(pid(2), 1),
            StockRequest::new(pid(1), 7),
        ]);
        assert_eq!(merged, vec![StockRequest::new(pid(1), 7), StockRequest::new(pid(2), 1)]);
    }

    #[test]
    fn commit_then_restore_is_identity() {
        let lines = [StockRequest::new(pid(1), 3), StockRequest::new(pid(2), 2)];
        let commit = plan_commit(&lines, &[snap(1, 3), snap(2, 8)]).unwrap();
        assert_eq!(commit[0].apply_to(3), Ok(0));
        assert_eq!(commit[1].apply_to(8), Ok(6));

        let restore = plan_restore(&lines);
        assert_eq!(restore[0].apply_to(0), Ok(3));
        assert_eq!(restore[1].apply_to(6), Ok(8));
    }

    #[test]
    fn adjustment_never_goes_negative() {
        let adj = StockAdjustment { product_id: pid(1), delta: -4 };
        assert_eq!(adj.apply_to(3), Err(DomainError::insufficient_stock(pid(1), 4, 3)));
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 512,
                ..ProptestConfig::default()
            })]

            /// Property: a batch passes iff every line fits its own on-hand.
            #[test]
            fn batch_passes_iff_every_line_fits(
                lines in prop::collection::vec((0u32..20, 0u32..20), 1..10)
            ) {
                let requests: Vec<StockRequest> = lines
                    .iter()
                    .enumerate()
                    .map(|(i, (qty, _))| StockRequest::new(pid(i as i64 + 1), *qty))
                    .collect();
                let stock: Vec<StockSnapshot> = lines
                    .iter()
                    .enumerate()
                    .map(|(i, (_, on_hand))| snap(i as i64 + 1, *on_hand))
                    .collect();

                let all_fit = lines.iter().all(|(qty, on_hand)| qty <= on_hand);
                prop_assert_eq!(check_availability(&requests, &stock).is_ok(), all_fit);
            }

            /// Property: committed stock is never negative.
            #[test]
            fn commit_never_drives_stock_negative(qty in 0u32..50, on_hand in 0u32..50) {
                let lines = [StockRequest::new(pid(1), qty)];
                match plan_commit(&lines, &[snap(1, on_hand)]) {
                    Ok(adj) => prop_assert_eq!(adj[0].apply_to(on_hand), Ok(on_hand - qty)),
                    Err(_) => prop_assert!(qty > on_hand),
                }
            }
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_core::{
    Aggregate, AggregateRoot, ContactId, DomainError, OrderId, ProductId, UserId,
};
use procura_inventory::{
    StockAdjustment, StockPolicy, StockRequest, StockSnapshot, check_availability, merge_requests,
    plan_commit, plan_restore,
};

use crate::state::OrderState;

/// One product line of an order. Unique per product within an order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Persistence shape of an order, used to rehydrate the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub state: OrderState,
    pub contact_id: Option<ContactId>,
    pub lines: Vec<OrderLine>,
    /// Whether finalize took the lines out of quantity-on-hand.
    pub stock_committed: bool,
    pub version: u64,
}

/// Aggregate root: Order.
///
/// An order starts life as the user's basket and is placed by `Finalize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    created_at: DateTime<Utc>,
    state: OrderState,
    contact_id: Option<ContactId>,
    lines: Vec<OrderLine>,
    stock_committed: bool,
    version: u64,
}

impl Order {
    /// A fresh, empty basket.
    pub fn basket(id: OrderId, user_id: UserId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            created_at,
            state: OrderState::Basket,
            contact_id: None,
            lines: Vec::new(),
            stock_committed: false,
            version: 0,
        }
    }

    pub fn from_record(record: OrderRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            created_at: record.created_at,
            state: record.state,
            contact_id: record.contact_id,
            lines: record.lines,
            stock_committed: record.stock_committed,
            version: record.version,
        }
    }

    pub fn to_record(&self) -> OrderRecord {
        OrderRecord {
            id: self.id,
            user_id: self.user_id,
            created_at: self.created_at,
            state: self.state,
            contact_id: self.contact_id,
            lines: self.lines.clone(),
            stock_committed: self.stock_committed,
            version: self.version,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn contact_id(&self) -> Option<ContactId> {
        self.contact_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn stock_committed(&self) -> bool {
        self.stock_committed
    }

    pub fn quantity_of(&self, product_id: ProductId) -> Option<u32> {
        self.lines
            .iter()
            .find(|l| l.product_id == product_id)
            .map(|l| l.quantity)
    }

    pub fn is_modifiable(&self) -> bool {
        matches!(self.state, OrderState::Basket)
    }

    fn line_requests(&self) -> Vec<StockRequest> {
        self.lines
            .iter()
            .map(|l| StockRequest::new(l.product_id, l.quantity))
            .collect()
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: AddItems (upsert; an existing line's quantity is overwritten).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddItems {
    pub items: Vec<StockRequest>,
    /// Current stock of every requested product, read by the caller.
    pub stock: Vec<StockSnapshot>,
}

/// Command: UpdateQuantities (lines must already be in the basket).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateQuantities {
    pub items: Vec<StockRequest>,
    pub stock: Vec<StockSnapshot>,
}

/// Command: RemoveItems. Products not in the basket are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveItems {
    pub product_ids: Vec<ProductId>,
}

/// Command: Finalize (basket → new).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalize {
    /// Must already be verified as belonging to the order's user.
    pub contact_id: ContactId,
    pub stock_policy: StockPolicy,
    /// Needed only when the policy commits stock.
    pub stock: Vec<StockSnapshot>,
}

/// Command: Transition (shop/ops driven state change).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub target: OrderState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderCommand {
    AddItems(AddItems),
    UpdateQuantities(UpdateQuantities),
    RemoveItems(RemoveItems),
    Finalize(Finalize),
    Transition(Transition),
}

/// Event: ItemsAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsAdded {
    pub order_id: OrderId,
    pub items: Vec<StockRequest>,
}

/// Event: QuantitiesUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantitiesUpdated {
    pub order_id: OrderId,
    pub items: Vec<StockRequest>,
}

/// Event: ItemsRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsRemoved {
    pub order_id: OrderId,
    pub product_ids: Vec<ProductId>,
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub contact_id: ContactId,
    /// Empty unless the stock policy commits on finalize.
    pub stock_committed: Vec<StockAdjustment>,
}

/// Event: StateChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChanged {
    pub order_id: OrderId,
    pub from: OrderState,
    pub to: OrderState,
    /// Stock given back when a committed order is canceled.
    pub stock_restored: Vec<StockAdjustment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    ItemsAdded(ItemsAdded),
    QuantitiesUpdated(QuantitiesUpdated),
    ItemsRemoved(ItemsRemoved),
    OrderPlaced(OrderPlaced),
    StateChanged(StateChanged),
}

impl OrderEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::ItemsAdded(_) => "orders.basket.items_added",
            OrderEvent::QuantitiesUpdated(_) => "orders.basket.quantities_updated",
            OrderEvent::ItemsRemoved(_) => "orders.basket.items_removed",
            OrderEvent::OrderPlaced(_) => "orders.order.placed",
            OrderEvent::StateChanged(_) => "orders.order.state_changed",
        }
    }

    /// Stock movements the store must perform alongside this event.
    pub fn stock_adjustments(&self) -> &[StockAdjustment] {
        match self {
            OrderEvent::OrderPlaced(e) => &e.stock_committed,
            OrderEvent::StateChanged(e) => &e.stock_restored,
            _ => &[],
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::ItemsAdded(e) => {
                for item in &e.items {
                    match self.lines.iter_mut().find(|l| l.product_id == item.product_id) {
                        Some(line) => line.quantity = item.quantity,
                        None => self.lines.push(OrderLine {
                            product_id: item.product_id,
                            quantity: item.quantity,
                        }),
                    }
                }
            }
            OrderEvent::QuantitiesUpdated(e) => {
                for item in &e.items {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.product_id == item.product_id) {
                        line.quantity = item.quantity;
                    }
                }
            }
            OrderEvent::ItemsRemoved(e) => {
                self.lines.retain(|l| !e.product_ids.contains(&l.product_id));
            }
            OrderEvent::OrderPlaced(e) => {
                self.state = OrderState::New;
                self.contact_id = Some(e.contact_id);
                self.stock_committed = !e.stock_committed.is_empty();
            }
            OrderEvent::StateChanged(e) => {
                self.state = e.to;
                if !e.stock_restored.is_empty() {
                    self.stock_committed = false;
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::AddItems(cmd) => self.handle_add_items(cmd),
            OrderCommand::UpdateQuantities(cmd) => self.handle_update_quantities(cmd),
            OrderCommand::RemoveItems(cmd) => self.handle_remove_items(cmd),
            OrderCommand::Finalize(cmd) => self.handle_finalize(cmd),
            OrderCommand::Transition(cmd) => self.handle_transition(cmd),
        }
    }
}

impl Order {
    fn ensure_basket(&self) -> Result<(), DomainError> {
        if !self.is_modifiable() {
            return Err(DomainError::invariant(format!(
                "order {} is '{}' and can no longer be modified",
                self.id, self.state
            )));
        }
        Ok(())
    }

    fn validated_batch(items: &[StockRequest]) -> Result<Vec<StockRequest>, DomainError> {
        if items.is_empty() {
            return Err(DomainError::validation("at least one item is required"));
        }
        if let Some(zero) = items.iter().find(|i| i.quantity == 0) {
            return Err(DomainError::validation(format!(
                "quantity for product {} must be positive",
                zero.product_id
            )));
        }
        Ok(merge_requests(items))
    }

    fn handle_add_items(&self, cmd: &AddItems) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_basket()?;
        let items = Self::validated_batch(&cmd.items)?;
        check_availability(&items, &cmd.stock)?;

        Ok(vec![OrderEvent::ItemsAdded(ItemsAdded {
            order_id: self.id,
            items,
        })])
    }

    fn handle_update_quantities(
        &self,
        cmd: &UpdateQuantities,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_basket()?;
        let items = Self::validated_batch(&cmd.items)?;

        if let Some(missing) = items.iter().find(|i| self.quantity_of(i.product_id).is_none()) {
            return Err(DomainError::not_found(format!(
                "basket item for product {}",
                missing.product_id
            )));
        }
        check_availability(&items, &cmd.stock)?;

        Ok(vec![OrderEvent::QuantitiesUpdated(QuantitiesUpdated {
            order_id: self.id,
            items,
        })])
    }

    fn handle_remove_items(&self, cmd: &RemoveItems) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_basket()?;

        let mut product_ids: Vec<ProductId> = Vec::new();
        for id in &cmd.product_ids {
            if self.quantity_of(*id).is_some() && !product_ids.contains(id) {
                product_ids.push(*id);
            }
        }
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }

        Ok(vec![OrderEvent::ItemsRemoved(ItemsRemoved {
            order_id: self.id,
            product_ids,
        })])
    }

    fn handle_finalize(&self, cmd: &Finalize) -> Result<Vec<OrderEvent>, DomainError> {
        if self.state != OrderState::Basket {
            return Err(DomainError::invalid_transition(
                self.state.as_str(),
                OrderState::New.as_str(),
            ));
        }
        if self.lines.is_empty() {
            return Err(DomainError::validation("cannot place an order from an empty basket"));
        }

        let stock_committed = if cmd.stock_policy.commits_on_finalize() {
            plan_commit(&self.line_requests(), &cmd.stock)?
        } else {
            Vec::new()
        };

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: self.id,
            contact_id: cmd.contact_id,
            stock_committed,
        })])
    }

    fn handle_transition(&self, cmd: &Transition) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.state.allows_transition_to(cmd.target) {
            return Err(DomainError::invalid_transition(
                self.state.as_str(),
                cmd.target.as_str(),
            ));
        }

        let stock_restored = if cmd.target == OrderState::Canceled && self.stock_committed {
            plan_restore(&self.line_requests())
        } else {
            Vec::new()
        };

        Ok(vec![OrderEvent::StateChanged(StateChanged {
            order_id: self.id,
            from: self.state,
            to: cmd.target,
            stock_restored,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_order_id() -> OrderId {
        OrderId::new(1)
    }

    fn test_user_id() -> UserId {
        UserId::new(100)
    }

    fn pid(n: i64) -> ProductId {
        ProductId::new(n)
    }

    fn snap(n: i64, on_hand: u32) -> StockSnapshot {
        StockSnapshot { product_id: pid(n), on_hand, orderable: true }
    }

    fn basket() -> Order {
        Order::basket(test_order_id(), test_user_id(), Utc::now())
    }

    fn add(order: &mut Order, items: &[(i64, u32)], stock: &[StockSnapshot]) -> Result<Vec<OrderEvent>, DomainError> {
        order.execute(&OrderCommand::AddItems(AddItems {
            items: items.iter().map(|(p, q)| StockRequest::new(pid(*p), *q)).collect(),
            stock: stock.to_vec(),
        }))
    }

    fn finalize(order: &mut Order, policy: StockPolicy, stock: &[StockSnapshot]) -> Result<Vec<OrderEvent>, DomainError> {
        order.execute(&OrderCommand::Finalize(Finalize {
            contact_id: ContactId::new(7),
            stock_policy: policy,
            stock: stock.to_vec(),
        }))
    }

    fn transition(order: &mut Order, target: OrderState) -> Result<Vec<OrderEvent>, DomainError> {
        order.execute(&OrderCommand::Transition(Transition { target }))
    }

    #[test]
    fn add_items_upserts_lines() {
        let mut order = basket();
        add(&mut order, &[(1, 2)], &[snap(1, 5)]).unwrap();
        add(&mut order, &[(1, 4), (2, 1)], &[snap(1, 5), snap(2, 1)]).unwrap();

        assert_eq!(order.lines().len(), 2);
        assert_eq!(order.quantity_of(pid(1)), Some(4));
        assert_eq!(order.quantity_of(pid(2)), Some(1));
        assert_eq!(order.version(), 2);
    }

    #[test]
    fn over_stock_request_leaves_basket_unchanged() {
        let mut order = basket();
        let err = add(&mut order, &[(1, 6)], &[snap(1, 5)]).unwrap_err();

        assert_eq!(err, DomainError::insufficient_stock(pid(1), 6, 5));
        assert!(order.lines().is_empty());
        assert_eq!(order.version(), 0);
    }

    #[test]
    fn batch_with_one_bad_item_applies_nothing() {
        let mut order = basket();
        let err = add(&mut order, &[(1, 1), (2, 10)], &[snap(1, 5), snap(2, 3)]).unwrap_err();

        assert!(matches!(err, DomainError::InsufficientStock { .. }));
        assert!(order.lines().is_empty());
    }

    #[test]
    fn zero_quantity_and_empty_batch_are_rejected() {
        let mut order = basket();
        assert!(matches!(add(&mut order, &[(1, 0)], &[snap(1, 5)]), Err(DomainError::Validation(_))));
        assert!(matches!(add(&mut order, &[], &[]), Err(DomainError::Validation(_))));
    }

    #[test]
    fn update_requires_existing_line_and_stock() {
        let mut order = basket();
        add(&mut order, &[(1, 1)], &[snap(1, 5)]).unwrap();

        let update = |items: Vec<StockRequest>, stock: Vec<StockSnapshot>| {
            OrderCommand::UpdateQuantities(UpdateQuantities { items, stock })
        };

        let err = order
            .execute(&update(vec![StockRequest::new(pid(2), 1)], vec![snap(2, 5)]))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));

        let err = order
            .execute(&update(vec![StockRequest::new(pid(1), 9)], vec![snap(1, 5)]))
            .unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock { .. }));

        order
            .execute(&update(vec![StockRequest::new(pid(1), 5)], vec![snap(1, 5)]))
            .unwrap();
        assert_eq!(order.quantity_of(pid(1)), Some(5));
    }

    #[test]
    fn remove_ignores_unknown_products() {
        let mut order = basket();
        add(&mut order, &[(1, 1), (2, 1)], &[snap(1, 5), snap(2, 5)]).unwrap();

        let events = order
            .execute(&OrderCommand::RemoveItems(RemoveItems { product_ids: vec![pid(2), pid(9)] }))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(order.lines(), &[OrderLine { product_id: pid(1), quantity: 1 }]);

        let events = order
            .execute(&OrderCommand::RemoveItems(RemoveItems { product_ids: vec![pid(9)] }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn finalize_places_order_with_contact() {
        let mut order = basket();
        add(&mut order, &[(1, 2), (2, 1)], &[snap(1, 5), snap(2, 5)]).unwrap();
        finalize(&mut order, StockPolicy::Advisory, &[]).unwrap();

        assert_eq!(order.state(), OrderState::New);
        assert_eq!(order.contact_id(), Some(ContactId::new(7)));
        assert!(!order.stock_committed());
        assert!(!order.is_modifiable());
    }

    #[test]
    fn refinalize_is_rejected() {
        let mut order = basket();
        add(&mut order, &[(1, 1)], &[snap(1, 5)]).unwrap();
        finalize(&mut order, StockPolicy::Advisory, &[]).unwrap();

        let err = finalize(&mut order, StockPolicy::Advisory, &[]).unwrap_err();
        assert_eq!(err, DomainError::invalid_transition("new", "new"));
        assert_eq!(order.state(), OrderState::New);
    }

    #[test]
    fn empty_basket_cannot_be_finalized() {
        let mut order = basket();
        assert!(matches!(
            finalize(&mut order, StockPolicy::Advisory, &[]),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn placed_order_rejects_item_changes() {
        let mut order = basket();
        add(&mut order, &[(1, 1)], &[snap(1, 5)]).unwrap();
        finalize(&mut order, StockPolicy::Advisory, &[]).unwrap();

        match add(&mut order, &[(1, 1)], &[snap(1, 5)]).unwrap_err() {
            DomainError::InvariantViolation(msg) if msg.contains("can no longer be modified") => {}
            other => panic!("Expected InvariantViolation, got {:?}", other),
        }
    }

    #[test]
    fn commit_policy_decrements_at_finalize_and_restores_on_cancel() {
        let mut order = basket();
        add(&mut order, &[(1, 3)], &[snap(1, 5)]).unwrap();

        let events = finalize(&mut order, StockPolicy::DecrementOnFinalize, &[snap(1, 5)]).unwrap();
        assert_eq!(
            events[0].stock_adjustments(),
            &[StockAdjustment { product_id: pid(1), delta: -3 }]
        );
        assert!(order.stock_committed());

        let events = transition(&mut order, OrderState::Canceled).unwrap();
        assert_eq!(
            events[0].stock_adjustments(),
            &[StockAdjustment { product_id: pid(1), delta: 3 }]
        );
        assert!(!order.stock_committed());
    }

    #[test]
    fn commit_policy_fails_finalize_when_stock_ran_out() {
        let mut order = basket();
        add(&mut order, &[(1, 3)], &[snap(1, 5)]).unwrap();

        let err = finalize(&mut order, StockPolicy::DecrementOnFinalize, &[snap(1, 2)]).unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock(pid(1), 3, 2));
        assert_eq!(order.state(), OrderState::Basket);
    }

    #[test]
    fn operator_walks_the_happy_path() {
        let mut order = basket();
        add(&mut order, &[(1, 1)], &[snap(1, 5)]).unwrap();
        finalize(&mut order, StockPolicy::Advisory, &[]).unwrap();

        for target in [OrderState::Confirmed, OrderState::Assembled, OrderState::Sent, OrderState::Delivered] {
            transition(&mut order, target).unwrap();
            assert_eq!(order.state(), target);
        }

        let err = transition(&mut order, OrderState::Canceled).unwrap_err();
        assert_eq!(err, DomainError::invalid_transition("delivered", "canceled"));
    }

    #[test]
    fn basket_cannot_jump_to_new_by_transition() {
        let mut order = basket();
        add(&mut order, &[(1, 1)], &[snap(1, 5)]).unwrap();
        assert!(matches!(
            transition(&mut order, OrderState::New),
            Err(DomainError::InvalidTransition { .. })
        ));
        transition(&mut order, OrderState::Canceled).unwrap();
        assert_eq!(order.state(), OrderState::Canceled);
    }

    #[test]
    fn record_round_trip_preserves_state() {
        let mut order = basket();
        add(&mut order, &[(1, 2)], &[snap(1, 5)]).unwrap();
        let restored = Order::from_record(order.to_record());
        assert_eq!(restored, order);
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_state() -> impl Strategy<Value = OrderState> {
            prop::sample::select(OrderState::ALL.to_vec())
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: any sequence of transitions only ever follows allowed edges,
            /// and once terminal the order never changes again.
            #[test]
            fn transitions_follow_the_state_graph(targets in prop::collection::vec(arb_state(), 0..20)) {
                let mut order = basket();
                add(&mut order, &[(1, 1)], &[snap(1, 5)]).unwrap();
                finalize(&mut order, StockPolicy::Advisory, &[]).unwrap();

                for target in targets {
                    let before = order.state();
                    let result = transition(&mut order, target);
                    prop_assert_eq!(result.is_ok(), before.allows_transition_to(target));
                    if result.is_err() {
                        prop_assert_eq!(order.state(), before);
                    }
                    if before.is_terminal() {
                        prop_assert_eq!(order.state(), before);
                    }
                }
            }

            /// Property: handle does not mutate state.
            #[test]
            fn handle_is_pure(qty in 1u32..10, on_hand in 0u32..10) {
                let order = basket();
                let cmd = OrderCommand::AddItems(AddItems {
                    items: vec![StockRequest::new(pid(1), qty)],
                    stock: vec![snap(1, on_hand)],
                });
                let before = order.clone();
                let first = order.handle(&cmd);
                let second = order.handle(&cmd);
                prop_assert_eq!(&before, &order);
                prop_assert_eq!(first, second);
            }

            /// Property: a failing batch never changes the basket.
            #[test]
            fn failing_batch_is_atomic(
                quantities in prop::collection::vec((1u32..10, 0u32..10), 1..8)
            ) {
                let mut order = basket();
                let items: Vec<(i64, u32)> = quantities
                    .iter()
                    .enumerate()
                    .map(|(i, (q, _))| (i as i64 + 1, *q))
                    .collect();
                let stock: Vec<StockSnapshot> = quantities
                    .iter()
                    .enumerate()
                    .map(|(i, (_, h))| snap(i as i64 + 1, *h))
                    .collect();

                match add(&mut order, &items, &stock) {
                    Ok(_) => prop_assert_eq!(order.lines().len(), items.len()),
                    Err(_) => {
                        prop_assert!(order.lines().is_empty());
                        prop_assert_eq!(order.version(), 0);
                    }
                }
            }
        }
    }
}

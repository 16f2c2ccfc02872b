//! Scripted backend for unit tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use afrikraga_core::{LineItemId, LineKey, SessionToken};
use rust_decimal::Decimal;

use crate::api::{AddLine, ApiError, CartApi, ConfirmedLine, LineResponse, ServerCart};

/// A recorded call against [`FakeApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Fetch(Option<String>),
    Add(LineKey, u32, Option<String>),
    Update(LineItemId, u32),
    Remove(LineItemId),
    Clear,
}

/// In-memory backend cart that records every call.
#[derive(Clone, Default)]
pub struct FakeApi {
    inner: Arc<Mutex<FakeState>>,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<Call>,
    lines: Vec<ConfirmedLine>,
    session: Option<SessionToken>,
    next_id: i64,
    failing: bool,
    add_delay: Option<Duration>,
    server_price: Option<Decimal>,
}

impl FakeApi {
    pub fn new() -> Self {
        let api = Self::default();
        api.state().next_id = 99;
        api
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn lines(&self) -> Vec<ConfirmedLine> {
        self.state().lines.clone()
    }

    pub fn session(&self) -> Option<SessionToken> {
        self.state().session.clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.state().failing = failing;
    }

    pub fn set_add_delay(&self, delay: Duration) {
        self.state().add_delay = Some(delay);
    }

    /// Price the server reports for every line.
    pub fn set_server_price(&self, price: Decimal) {
        self.state().server_price = Some(price);
    }

    /// Seed a server cart as if another device had filled it.
    pub fn seed(&self, session: SessionToken, lines: Vec<ConfirmedLine>) {
        let mut state = self.state();
        state.session = Some(session);
        state.lines = lines;
    }

    fn check(state: &FakeState) -> Result<(), ApiError> {
        if state.failing {
            return Err(ApiError::Api {
                status: 503,
                message: "backend unavailable".to_string(),
            });
        }
        Ok(())
    }
}

fn token_string(session: Option<&SessionToken>) -> Option<String> {
    session.map(|token| token.as_str().to_string())
}

impl CartApi for FakeApi {
    async fn fetch_cart(&self, session: Option<&SessionToken>) -> Result<ServerCart, ApiError> {
        let mut state = self.state();
        state.calls.push(Call::Fetch(token_string(session)));
        Self::check(&state)?;
        Ok(ServerCart {
            session: None,
            lines: state.lines.clone(),
        })
    }

    async fn add_line(
        &self,
        session: Option<&SessionToken>,
        line: AddLine,
    ) -> Result<LineResponse, ApiError> {
        let delay = self.state().add_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state
            .calls
            .push(Call::Add(line.key, line.quantity, token_string(session)));
        Self::check(&state)?;

        let issued = if session.is_none() && state.session.is_none() {
            let token = SessionToken::new(format!("sess_{}", state.next_id));
            state.session.clone_from(&token);
            token
        } else {
            None
        };

        let price = state.server_price;
        let confirmed = if let Some(existing) = state.lines.iter_mut().find(|l| l.key() == line.key) {
            existing.quantity += line.quantity;
            existing.clone()
        } else {
            let confirmed = ConfirmedLine {
                id: LineItemId::new(state.next_id),
                product_id: line.key.product_id,
                variant_id: line.key.variant_id,
                quantity: line.quantity,
                unit_price: price,
                name: None,
                image: None,
            };
            state.next_id += 1;
            state.lines.push(confirmed.clone());
            confirmed
        };

        Ok(LineResponse {
            session: issued,
            line: confirmed,
        })
    }

    async fn update_line(
        &self,
        _session: Option<&SessionToken>,
        id: LineItemId,
        quantity: u32,
    ) -> Result<Option<ConfirmedLine>, ApiError> {
        let mut state = self.state();
        state.calls.push(Call::Update(id, quantity));
        Self::check(&state)?;
        let line = state.lines.iter_mut().find(|l| l.id == id).map(|line| {
            line.quantity = quantity;
            line.clone()
        });
        Ok(line)
    }

    async fn remove_line(
        &self,
        _session: Option<&SessionToken>,
        id: LineItemId,
    ) -> Result<(), ApiError> {
        let mut state = self.state();
        state.calls.push(Call::Remove(id));
        Self::check(&state)?;
        state.lines.retain(|l| l.id != id);
        Ok(())
    }

    async fn clear_cart(&self, _session: Option<&SessionToken>) -> Result<(), ApiError> {
        let mut state = self.state();
        state.calls.push(Call::Clear);
        Self::check(&state)?;
        state.lines.clear();
        Ok(())
    }
}

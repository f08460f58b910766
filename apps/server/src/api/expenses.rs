use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fxledger_core::events::{DomainEvent, DomainEventSink};
use fxledger_core::expenses::{Expense, ExpenseSource};

use crate::{error::ApiResult, main_lib::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewExpenseRequest {
    amount: Decimal,
    currency: String,
    transaction_date: NaiveDate,
    description: String,
    legacy_conversion_rate: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateTransactionDateRequest {
    transaction_date: NaiveDate,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExpenseResponse {
    id: i64,
    amount: Decimal,
    currency: String,
    transaction_date: NaiveDate,
    description: String,
    legacy_conversion_rate: Option<Decimal>,
}

impl From<Expense> for ExpenseResponse {
    fn from(e: Expense) -> Self {
        Self {
            id: e.id,
            amount: e.amount,
            currency: e.currency,
            transaction_date: e.transaction_date,
            description: e.description,
            legacy_conversion_rate: e.legacy_conversion_rate,
        }
    }
}

async fn create_expense(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewExpenseRequest>,
) -> ApiResult<Json<ExpenseResponse>> {
    state
        .currencies
        .validate(&body.currency)
        .map_err(fxledger_core::errors::Error::from)?;

    let created = state
        .expenses
        .create(
            body.amount,
            body.currency.clone(),
            body.transaction_date,
            body.description,
            body.legacy_conversion_rate,
        )
        .await?;

    state.event_sink().emit(DomainEvent::expense_created(
        created.id,
        created.currency.clone(),
        created.transaction_date,
    ));

    Ok(Json(created.into()))
}

async fn get_expense(
    Path(id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ExpenseResponse>> {
    let expense = state
        .expenses
        .find(id)
        .await?
        .ok_or(crate::error::ApiError::NotFound)?;
    Ok(Json(expense.into()))
}

async fn update_expense_transaction_date(
    Path(id): Path<i64>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<UpdateTransactionDateRequest>,
) -> ApiResult<Json<ExpenseResponse>> {
    let changed = state
        .expenses
        .update_transaction_date(id, body.transaction_date)
        .await?;

    let expense = state
        .expenses
        .find(id)
        .await?
        .ok_or(crate::error::ApiError::NotFound)?;

    if changed {
        state.event_sink().emit(DomainEvent::expense_date_changed(
            expense.id,
            expense.currency.clone(),
            expense.transaction_date,
        ));
    }

    Ok(Json(expense.into()))
}

async fn delete_expense(
    Path(id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<StatusCode> {
    state.expenses.delete(id).await?;
    state
        .event_sink()
        .emit(DomainEvent::expense_deleted(id));
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/expenses", post(create_expense))
        .route("/expenses/{id}", get(get_expense).delete(delete_expense))
        .route(
            "/expenses/{id}/transaction-date",
            put(update_expense_transaction_date),
        )
}

//! Cart commands.
//!
//! Each command first waits for the startup load so it edits the merged cart,
//! then waits again so the change reaches the server before the process exits.

use afrikraga_cart::{CartEngine, FileStore, QuantityChange};
use afrikraga_core::{CartLineItem, CartTotals, LineId, NewLineItem, ProductId, VariantId};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::info;

use super::CliError;

type Cart = CartEngine<FileStore>;

const NAME_WIDTH: usize = 32;

/// Build an add request from command-line arguments.
pub fn new_item(
    product: i64,
    variant: Option<i64>,
    quantity: u32,
    price: Decimal,
    name: String,
    image: Option<String>,
) -> NewLineItem {
    NewLineItem {
        product_id: ProductId::new(product),
        variant_id: variant.map(VariantId::new),
        quantity,
        unit_price: price,
        name,
        image,
    }
}

pub async fn show(cart: &Cart, json: bool) -> Result<(), CliError> {
    cart.flush().await;
    render(&cart.snapshot(), &cart.totals(), json)
}

pub async fn add(cart: &Cart, item: NewLineItem, json: bool) -> Result<(), CliError> {
    cart.flush().await;
    match cart.add(item) {
        Some(row) => info!(line_id = %row.id, quantity = row.quantity, "Added to cart"),
        None => info!("Quantity 0, nothing added"),
    }
    cart.flush().await;
    render(&cart.snapshot(), &cart.totals(), json)
}

pub async fn set_quantity(
    cart: &Cart,
    id: &LineId,
    quantity: i64,
    json: bool,
) -> Result<(), CliError> {
    cart.flush().await;
    match cart.set_quantity(id, quantity) {
        QuantityChange::Updated(row) => {
            info!(line_id = %row.id, quantity = row.quantity, "Quantity updated");
        }
        QuantityChange::Removed(row) => info!(line_id = %row.id, "Removed from cart"),
        QuantityChange::Missing => return Err(CliError::NotInCart(*id)),
    }
    cart.flush().await;
    render(&cart.snapshot(), &cart.totals(), json)
}

pub async fn remove(cart: &Cart, id: &LineId, json: bool) -> Result<(), CliError> {
    cart.flush().await;
    let row = cart.remove(id).ok_or(CliError::NotInCart(*id))?;
    info!(line_id = %row.id, "Removed from cart");
    cart.flush().await;
    render(&cart.snapshot(), &cart.totals(), json)
}

pub async fn clear(cart: &Cart) -> Result<(), CliError> {
    cart.flush().await;
    cart.clear();
    cart.flush().await;
    Ok(())
}

pub async fn sync(cart: &Cart, json: bool) -> Result<(), CliError> {
    cart.reload();
    cart.flush().await;
    render(&cart.snapshot(), &cart.totals(), json)
}

#[allow(clippy::print_stdout)]
fn render(rows: &[CartLineItem], totals: &CartTotals, json: bool) -> Result<(), CliError> {
    if json {
        let out = json!({
            "items": rows,
            "itemCount": totals.item_count,
            "subtotal": totals.subtotal,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("Cart is empty");
        return Ok(());
    }

    println!(
        "{:<12} {:<width$} {:>5} {:>10} {:>10}",
        "ID",
        "ITEM",
        "QTY",
        "PRICE",
        "TOTAL",
        width = NAME_WIDTH,
    );
    for row in rows {
        let marker = if row.is_local() { " *" } else { "" };
        println!(
            "{:<12} {:<width$} {:>5} {:>10} {:>10}",
            format!("{}{marker}", row.id),
            truncate(&row.name, NAME_WIDTH),
            row.quantity,
            row.unit_price.to_string(),
            row.line_total().to_string(),
            width = NAME_WIDTH,
        );
    }
    println!();
    println!("{} items, subtotal {}", totals.item_count, totals.subtotal);
    if rows.iter().any(CartLineItem::is_local) {
        println!("* not yet on the server");
    }
    Ok(())
}

fn truncate(name: &str, max: usize) -> String {
    if name.chars().count() <= max {
        return name.to_string();
    }
    let mut short: String = name.chars().take(max.saturating_sub(1)).collect();
    short.push('…');
    short
}

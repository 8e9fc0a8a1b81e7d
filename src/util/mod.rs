mod money_amount;
mod shutdown;

pub use money_amount::{MoneyAmount, MoneyAmountParseError, to_atomic};
pub use shutdown::shutdown_token;

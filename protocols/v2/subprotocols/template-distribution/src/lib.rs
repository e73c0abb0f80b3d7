//! # Sv2 Template Distribution protocol messages
//!
//! The message set a Template Provider exchanges with its clients: the
//! client declares its coinbase constraints, the server pushes block
//! templates and prev-hash updates, the client may request full transaction
//! data and submit block solutions.
//!
//! See the [Template Distribution protocol
//! specification](https://stratumprotocol.org/specification/07-Template-Distribution-Protocol/)
//! for the normative field descriptions.

mod coinbase_output_constraints;
mod new_template;
mod request_transaction_data;
mod set_new_prev_hash;
mod submit_solution;

pub use coinbase_output_constraints::CoinbaseOutputConstraints;
pub use new_template::NewTemplate;
pub use request_transaction_data::{
    RequestTransactionData, RequestTransactionDataError, RequestTransactionDataSuccess,
};
pub use set_new_prev_hash::SetNewPrevHash;
pub use submit_solution::SubmitSolution;

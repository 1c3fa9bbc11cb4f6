mod client;
mod model;

pub use client::{HttpSender, ReqwestSender, TransportError};
pub use model::{status_text_for, Header, HttpRequest, HttpResponse};
pub(crate) use model::find_header;

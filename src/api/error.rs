//! Tipos de erro para o cliente HTTP do Oasis.
//!
//! Define [`ClientError`] com variantes para workflows inexistentes, erros
//! devolvidos pelo servidor e erros de rede. Usa `thiserror` para derivar
//! `Display` e `Error` a partir dos atributos `#[error(...)]`.

use thiserror::Error;

/// Erros que podem ocorrer ao falar com um servidor Oasis.
#[derive(Debug, Error)]
pub enum ClientError {
    /// O servidor respondeu 404 para o identificador pedido.
    #[error("workflow not found: {0}")]
    NotFound(String),

    /// Qualquer outra resposta de erro (400 query inválida, 422 corpo malformado, 5xx).
    /// A mensagem vem do campo `message` do corpo, ou do texto bruto se não for JSON.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = ClientError::NotFound("workflow_123".into());
        assert_eq!(err.to_string(), "workflow not found: workflow_123");
    }

    #[test]
    fn api_error_display() {
        let err = ClientError::Api {
            status: 400,
            message: "Query cannot be empty".into(),
        };
        assert_eq!(err.to_string(), "API error (status 400): Query cannot be empty");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ClientError>();
    }
}

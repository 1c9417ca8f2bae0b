//! Errors surfaced to the reconnection flow.
//!
//! Every variant renders as a short Portuguese message fit for the user.

use thiserror::Error;

use crate::gateway::Operation;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Instância não informada. Adicione o parâmetro '?instance=NOME_DA_INSTANCIA' na URL.")]
    MissingInstance,

    #[error("Parâmetro de instância inválido")]
    InvalidInstance,

    #[error("Instância não encontrada")]
    NotFound,

    #[error("Acesso não autorizado")]
    Unauthorized,

    #[error("{}", operation.status_message(*status))]
    Status { operation: Operation, status: u16 },

    #[error("Tempo limite excedido. Verifique sua conexão e tente novamente.")]
    Timeout,

    #[error("Falha de comunicação com o servidor: {0}")]
    Transport(String),

    #[error("Resposta inválida do servidor: {0}")]
    Parse(String),

    #[error("Estado de conexão desconhecido: {0}")]
    UnexpectedState(String),

    #[error("QR Code não recebido do servidor")]
    MissingQr,
}

impl ClientError {
    /// Map a non-2xx status for `operation` to its error.
    ///
    /// 504 is the proxy's answer to a gateway timeout, so it reads as one.
    pub fn from_status(operation: Operation, status: u16) -> Self {
        match status {
            404 => ClientError::NotFound,
            401 | 403 => ClientError::Unauthorized,
            504 => ClientError::Timeout,
            _ => ClientError::Status { operation, status },
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_decode() {
            ClientError::Parse(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

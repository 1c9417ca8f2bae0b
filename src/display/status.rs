//! Status formatting for terminal output.

use crossterm::execute;
use crossterm::style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor};
use std::io::{stdout, Write};

use super::qr::{clear_qr_display, render_qr_code};
use crate::reconnect::{ConnectionStatus, ReconnectSnapshot};

/// Fallback shown when an error carries no message
const GENERIC_ERROR: &str =
    "Erro ao conectar. Verifique se o parâmetro da instância está correto.";

/// Kind of status line, selects colour and icon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Loading,
    Success,
    Error,
}

/// The line shown for a snapshot
pub fn status_message(snapshot: &ReconnectSnapshot) -> (MessageKind, String) {
    match snapshot.status {
        ConnectionStatus::Checking => (
            MessageKind::Loading,
            "Verificando status da instância...".to_string(),
        ),
        ConnectionStatus::Connected => (
            MessageKind::Success,
            "Instância conectada com sucesso.".to_string(),
        ),
        ConnectionStatus::Reconnecting => (
            MessageKind::Loading,
            "Reconectando... gerando QR Code".to_string(),
        ),
        ConnectionStatus::Error => (
            MessageKind::Error,
            snapshot
                .error
                .clone()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| GENERIC_ERROR.to_string()),
        ),
    }
}

/// Renders snapshots to the terminal, redrawing only what changed
#[derive(Default)]
pub struct TerminalView {
    last_line: Option<(MessageKind, String)>,
    last_qr: Option<String>,
}

impl TerminalView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, snapshot: &ReconnectSnapshot) -> anyhow::Result<()> {
        let showing_qr = snapshot.status == ConnectionStatus::Reconnecting;
        let qr = snapshot.qr.as_ref().filter(|_| showing_qr);
        let qr_key = qr.map(|q| q.data.clone());

        if qr_key != self.last_qr {
            match qr {
                Some(payload) => match payload.scannable_text() {
                    Some(text) => {
                        render_qr_code(text, &snapshot.instance)?;
                        if let Some(code) = &payload.pairing_code {
                            println!("  Ou use o código: {}\n", code);
                        }
                    }
                    None => {
                        clear_qr_display()?;
                        print_warning(
                            "O servidor enviou apenas a imagem do QR Code. Abra a página web para escaneá-lo.",
                        );
                    }
                },
                None => {
                    if self.last_qr.is_some() {
                        clear_qr_display()?;
                    }
                }
            }
            self.last_qr = qr_key;
            // Redraw the status line below the fresh screen.
            self.last_line = None;
        }

        let line = status_message(snapshot);
        if self.last_line.as_ref() != Some(&line) {
            print_status(line.0, &line.1);
            self.last_line = Some(line);
        }

        Ok(())
    }
}

fn print_status(kind: MessageKind, message: &str) {
    match kind {
        MessageKind::Loading => print_info(message),
        MessageKind::Success => print_success(message),
        MessageKind::Error => print_error(message),
    }
}

/// Print the one-time connected banner
pub fn print_connected(instance: &str) {
    let mut stdout = stdout();
    let _ = execute!(
        stdout,
        SetForegroundColor(Color::Green),
        SetAttribute(Attribute::Bold),
        Print("✓ WhatsApp reconectado"),
        SetAttribute(Attribute::Reset),
        ResetColor
    );
    println!();
    println!("  Instância: {}", instance);
    println!();
}

fn print_success(message: &str) {
    let mut stdout = stdout();
    let _ = execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        Print(message),
        ResetColor
    );
    println!();
}

/// Print an error message
pub fn print_error(message: &str) {
    let mut stdout = stdout();
    let _ = execute!(
        stdout,
        SetForegroundColor(Color::Red),
        SetAttribute(Attribute::Bold),
        Print("✗ Erro: "),
        SetAttribute(Attribute::Reset),
        SetForegroundColor(Color::Red),
        Print(message),
        ResetColor
    );
    println!();
}

/// Print a warning message
pub fn print_warning(message: &str) {
    let mut stdout = stdout();
    let _ = execute!(
        stdout,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        Print(message),
        ResetColor
    );
    println!();
}

/// Print an info message
pub fn print_info(message: &str) {
    let mut stdout = stdout();
    let _ = execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        Print(message),
        ResetColor
    );
    println!();
    let _ = stdout.flush();
}

//! QR code rendering for terminal display.

use anyhow::{Context, Result};
use crossterm::style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::{cursor, execute, terminal};
use qrcode::QrCode;
use std::io::{stdout, Write};

/// Modules of white border around the code, needed by phone scanners
const QUIET_ZONE: usize = 2;

/// Build the QR as rows of half-block characters.
///
/// Each terminal row carries two module rows: `▀` paints the top one, `▄` the
/// bottom one, `█` both. Light modules are spaces drawn on a white background.
pub fn qr_rows(data: &str) -> Result<Vec<String>> {
    let code = QrCode::new(data.as_bytes()).context("Failed to generate QR code")?;
    let modules = code.to_colors();
    let size = code.width();
    let total = size + QUIET_ZONE * 2;

    let dark = |x: usize, y: usize| -> bool {
        if x < QUIET_ZONE || y < QUIET_ZONE || x >= size + QUIET_ZONE || y >= size + QUIET_ZONE {
            return false;
        }
        modules[(y - QUIET_ZONE) * size + (x - QUIET_ZONE)] == qrcode::Color::Dark
    };

    let rows: Vec<String> = (0..total)
        .step_by(2)
        .map(|y| {
            (0..total)
                .map(|x| match (dark(x, y), dark(x, y + 1)) {
                    (true, true) => '█',
                    (true, false) => '▀',
                    (false, true) => '▄',
                    (false, false) => ' ',
                })
                .collect::<String>()
        })
        .collect();

    Ok(rows)
}

/// Clear the screen and draw the QR code with pairing instructions.
pub fn render_qr_code(data: &str, instance: &str) -> Result<()> {
    let rows = qr_rows(data)?;
    let mut stdout = stdout();

    execute!(
        stdout,
        terminal::Clear(terminal::ClearType::All),
        cursor::MoveTo(0, 0)
    )?;

    println!("\n  Reconexão de Instância: {}\n", instance);

    let term_width = terminal::size().map(|(w, _)| w as usize).unwrap_or(80);
    let qr_width = rows.first().map(|r| r.chars().count()).unwrap_or(0);
    let padding = " ".repeat(term_width.saturating_sub(qr_width) / 2);

    for row in &rows {
        print!("{}", padding);
        execute!(
            stdout,
            SetBackgroundColor(Color::White),
            SetForegroundColor(Color::Black),
            Print(row),
            ResetColor
        )?;
        println!();
    }

    println!();
    println!("  Abra o WhatsApp no seu celular e escaneie o QR Code acima para reconectar sua instância.");
    println!("  Digite 'r' e Enter para gerar um novo QR Code.\n");

    stdout.flush()?;
    Ok(())
}

/// Clear the QR code display
pub fn clear_qr_display() -> Result<()> {
    let mut stdout = stdout();
    execute!(
        stdout,
        terminal::Clear(terminal::ClearType::All),
        cursor::MoveTo(0, 0)
    )?;
    Ok(())
}

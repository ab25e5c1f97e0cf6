//! Boards command implementation.

use anyhow::Result;
use espboot::BoardKind;

/// List board profiles with their default flash parameters.
pub(crate) fn cmd_boards(json: bool) -> Result<()> {
    if json {
        let boards: Vec<serde_json::Value> = BoardKind::ALL
            .iter()
            .map(|board| {
                let flash = board.default_flash_params();
                let [mode_byte, size_freq_byte] = flash.info_bytes();
                serde_json::json!({
                    "name": board.name(),
                    "flash_mode": flash.mode.name(),
                    "flash_size": flash.size.name(),
                    "flash_freq": flash.frequency.name(),
                    "flash_info": [mode_byte, size_freq_byte],
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&boards)?);
        return Ok(());
    }

    for board in BoardKind::ALL {
        println!("{:<8} {}", board.name(), board.default_flash_params());
    }
    Ok(())
}

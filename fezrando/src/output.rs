//! Rendering of the transition list into the flat config file read by
//! the in-game level changer. Each direction of a transition is one
//! five-line paragraph: source level, the original-destination label
//! the game will ask for, then the new destination level, volume id,
//! and viewpoint. Paragraphs are separated by blank lines.

use crate::randomize::Transition;
use anyhow::{Context, Result};
use fezrando_game::{Entrance, GameData};
use std::fmt::Write as _;
use std::path::Path;

fn render_direction(out: &mut String, from: &Entrance, to: &Entrance, game_data: &GameData) {
    let _ = writeln!(out, "{}", from.level);
    let _ = writeln!(out, "{}", game_data.render_destination(&from.original_destination));
    let _ = writeln!(out, "{}", to.level);
    let _ = writeln!(out, "{}", to.volume_id);
    let _ = writeln!(out, "{}", to.viewpoint);
    let _ = writeln!(out);
}

pub fn render_config(transitions: &[Transition], game_data: &GameData) -> String {
    let mut out = String::new();
    for transition in transitions {
        render_direction(&mut out, &transition.from, &transition.to, game_data);
        render_direction(&mut out, &transition.to, &transition.from, game_data);
    }
    out
}

pub fn write_config(path: &Path, transitions: &[Transition], game_data: &GameData) -> Result<()> {
    std::fs::write(path, render_config(transitions, game_data))
        .with_context(|| format!("unable to write transition config to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_both_directions() {
        let json = r#"{
            "start_level": "A",
            "levels": [
                {"name": "A", "entrances": [
                    {"volume_id": 3, "viewpoint": "FRONT", "original_destination": "X"}
                ]},
                {"name": "B", "entrances": [
                    {"volume_id": 7, "viewpoint": "LEFT", "original_destination": "Y"}
                ]}
            ]
        }"#;
        let game_data = GameData::from_json(json).unwrap();
        let transition = Transition {
            from: game_data.levels[0].entrances[0].clone(),
            to: game_data.levels[1].entrances[0].clone(),
        };
        let rendered = render_config(&[transition], &game_data);
        assert_eq!(
            rendered,
            "A\nX\nB\n7\nLEFT\n\nB\nY\nA\n3\nFRONT\n\n"
        );
    }

    #[test]
    fn test_interior_pair_relabel_in_output() {
        let json = r#"{
            "start_level": "A",
            "interior_pair": ["CABIN_INTERIOR_A", "CABIN_INTERIOR_B"],
            "levels": [
                {"name": "A", "entrances": [
                    {"volume_id": 1, "viewpoint": "FRONT", "original_destination": "CABIN_INTERIOR_B"}
                ]},
                {"name": "CABIN_INTERIOR_A", "entrances": []},
                {"name": "CABIN_INTERIOR_B", "entrances": [
                    {"volume_id": 2, "viewpoint": "BACK", "original_destination": "A"}
                ]}
            ]
        }"#;
        let game_data = GameData::from_json(json).unwrap();
        let transition = Transition {
            from: game_data.levels[0].entrances[0].clone(),
            to: game_data.levels[2].entrances[0].clone(),
        };
        let rendered = render_config(&[transition], &game_data);
        // The B variant's name collapses onto A in the label the game
        // matches against; level names themselves are untouched.
        assert!(rendered.starts_with("A\nCABIN_INTERIOR_A\nCABIN_INTERIOR_B\n2\nBACK\n\n"));
    }
}

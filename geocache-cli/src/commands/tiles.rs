//! Tiles command: lists the grid tiles covering a bounding box.

use clap::Args;
use console::style;
use geocache::coord::{GeoBounds, TileRange};

use super::common::parse_bbox;
use crate::error::CliError;

/// Arguments of `geocache tiles`.
#[derive(Debug, Args)]
pub struct TilesArgs {
    /// Bounding box as south,west,north,east in degrees
    #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
    pub bbox: GeoBounds,

    /// Tile zoom level (defaults to the configured zoom)
    #[arg(long)]
    pub zoom: Option<u8>,
}

/// Runs the tiles command.
pub fn run(args: TilesArgs, default_zoom: u8) -> Result<(), CliError> {
    let zoom = args.zoom.unwrap_or(default_zoom);
    let range = args.bbox.tile_range(zoom)?;

    println!(
        "{} {}x{} tiles at zoom {}",
        style("Grid:").cyan().bold(),
        range.width(),
        range.height(),
        zoom
    );
    for line in tile_lines(&range) {
        println!("{}", line);
    }
    Ok(())
}

/// One line per tile, row-major: `z/x/y  envelope`.
fn tile_lines(range: &TileRange) -> Vec<String> {
    range
        .tiles()
        .map(|tile| format!("{}  {}", tile, tile.envelope()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geocache::coord::Tile;

    #[test]
    fn test_tile_lines_row_major() {
        let nw = Tile::new(8800, 5373, 14);
        let se = Tile::new(8801, 5374, 14);
        let range = GeoBounds::from_tile_range(nw, se)
            .unwrap()
            .tile_range(14)
            .unwrap();

        let lines = tile_lines(&range);
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("14/8800/5373"));
        assert!(lines[1].starts_with("14/8801/5373"));
        assert!(lines[2].starts_with("14/8800/5374"));
        assert!(lines[3].starts_with("14/8801/5374"));
    }
}

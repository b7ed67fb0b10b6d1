use crate::compose::CompositeImage;
use crate::config::PlacementSpec;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct PlacementDump {
    pub canvas_size: u32,
    pub reference_size: u32,
    pub instances: Vec<InstanceDump>,
    pub specs: Vec<SpecDump>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct InstanceDump {
    pub part: String,
    pub category: String,
    pub side: String,
    pub x: f32,
    pub y: f32,
    pub scale: f32,
    pub mirrored: bool,
    pub asset: String,
}

#[derive(Debug, Serialize)]
pub struct SpecDump {
    pub part: String,
    #[serde(flatten)]
    pub spec: PlacementSpec,
}

impl PlacementDump {
    pub fn from_composite(composite: &CompositeImage) -> Self {
        let instances = composite
            .instances()
            .iter()
            .map(|instance| InstanceDump {
                part: instance.key().to_string(),
                category: instance.category.to_string(),
                side: instance.side.to_string(),
                x: instance.placement.x,
                y: instance.placement.y,
                scale: instance.placement.scale,
                mirrored: instance.mirrored,
                asset: instance.asset.display().to_string(),
            })
            .collect();

        let specs = composite
            .placements()
            .iter()
            .map(|(key, spec)| SpecDump {
                part: key.to_string(),
                spec: *spec,
            })
            .collect();

        PlacementDump {
            canvas_size: composite.size(),
            reference_size: composite.placements().reference_size(),
            instances,
            specs,
            skipped: composite.skipped().iter().map(|err| err.to_string()).collect(),
        }
    }
}

pub fn write_placement_dump(path: &Path, composite: &CompositeImage) -> anyhow::Result<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    let dump = PlacementDump::from_composite(composite);
    serde_json::to_writer_pretty(writer, &dump)?;
    Ok(())
}

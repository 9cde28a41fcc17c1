//! Save-state format: a concatenation of tagged, size-prefixed byte blobs,
//! one per top-level component `Machine` owns. Each blob is an opaque
//! by-value snapshot produced by `bincode`; loading verifies every tag and
//! size lines up before touching any state, so a truncated or foreign file
//! is rejected outright rather than partially applied.
//!
//! `Bus` aggregates `Ppu`/`Apu`/`Timer`/`Serial`/`Joypad`/`Cartridge` as
//! plain fields (see `bus.rs`), so its blob already carries their state;
//! there is no separate PPU/APU/Timer tag to keep in lock-step with it.

use crate::{bus::Bus, cpu::Cpu, error::EmulatorErr};

const TAG_CPU: [u8; 4] = *b"CPU1";
const TAG_BUS: [u8; 4] = *b"BUS1";

fn config() -> impl bincode::config::Config {
    bincode::config::standard()
}

fn write_blob(out: &mut Vec<u8>, tag: [u8; 4], value: &impl bincode::Encode) {
    let bytes = bincode::encode_to_vec(value, config()).expect("save-state encoding is infallible");
    out.extend_from_slice(&tag);
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&bytes);
}

fn read_blob<T: bincode::Decode<()>>(
    data: &[u8],
    pos: &mut usize,
    expected_tag: [u8; 4],
) -> Result<T, EmulatorErr> {
    let tag = data
        .get(*pos..*pos + 4)
        .ok_or(EmulatorErr::SaveFileCorrupted)?;
    if tag != expected_tag {
        return Err(EmulatorErr::SaveFileCorrupted);
    }
    *pos += 4;

    let size_bytes = data
        .get(*pos..*pos + 4)
        .ok_or(EmulatorErr::SaveFileCorrupted)?;
    let size = u32::from_le_bytes(size_bytes.try_into().unwrap()) as usize;
    *pos += 4;

    let body = data
        .get(*pos..*pos + size)
        .ok_or(EmulatorErr::SaveFileCorrupted)?;
    *pos += size;

    let (value, consumed) =
        bincode::decode_from_slice(body, config()).map_err(|_| EmulatorErr::SaveFileCorrupted)?;
    if consumed != body.len() {
        return Err(EmulatorErr::SaveFileCorrupted);
    }
    Ok(value)
}

/// Serializes the CPU and Bus (and everything the Bus owns) into the
/// save-state byte format.
pub(crate) fn encode(cpu: &Cpu, bus: &Bus) -> Box<[u8]> {
    let mut out = Vec::new();
    write_blob(&mut out, TAG_CPU, cpu);
    write_blob(&mut out, TAG_BUS, bus);
    out.into_boxed_slice()
}

/// Parses a save-state byte blob back into a CPU and Bus. Fails if any tag
/// or declared size does not match, or there is trailing garbage.
pub(crate) fn decode(data: &[u8]) -> Result<(Cpu, Bus), EmulatorErr> {
    let mut pos = 0;
    let cpu = read_blob(data, &mut pos, TAG_CPU)?;
    let bus = read_blob(data, &mut pos, TAG_BUS)?;

    if pos != data.len() {
        return Err(EmulatorErr::SaveFileCorrupted);
    }

    Ok((cpu, bus))
}

use busgenc::c_emit;
use busgenc::ir::{
    BusFamily, BusMode, BusType, ByteOrder, Message, Meta, Signal, SourceFormat, SpecIr,
};

fn signal(name: &str, start_bit: u32, bit_length: u32, byte_order: ByteOrder) -> Signal {
    Signal {
        name: name.to_string(),
        start_bit,
        bit_length,
        byte_order,
        signed: false,
        scale: 1.0,
        offset: 0.0,
        min: None,
        max: None,
        default: None,
        unit: None,
        enum_entries: None,
    }
}

fn demo_spec() -> SpecIr {
    let mut temp = signal("temp", 15, 12, ByteOrder::BigEndian);
    temp.signed = true;
    SpecIr {
        ir_version: busgenc::IR_VERSION.to_string(),
        meta: Meta {
            name: "Demo Bus".to_string(),
            version: "1.0".to_string(),
            source: "demo.dbc".to_string(),
            format: SourceFormat::Dbc,
        },
        bus_type: BusType {
            bustype: BusFamily::Can,
            busmode: Some(BusMode::Classic),
        },
        messages: vec![Message {
            id: 0x102,
            name: "status".to_string(),
            dlc: 4,
            is_extended: false,
            signals: vec![
                signal("counter", 0, 4, ByteOrder::LittleEndian),
                signal("mode", 4, 4, ByteOrder::LittleEndian),
                temp,
            ],
        }],
    }
}

#[test]
fn emission_is_deterministic() {
    let spec = demo_spec();
    let first = c_emit::emit_protocol(&spec).expect("emit");
    let second = c_emit::emit_protocol(&spec).expect("emit again");
    assert_eq!(first.header, second.header);
    assert_eq!(first.source, second.source);

    let driver_a = c_emit::emit_roundtrip_driver(&spec).expect("driver");
    let driver_b = c_emit::emit_roundtrip_driver(&spec).expect("driver again");
    assert_eq!(driver_a, driver_b);
}

#[test]
fn header_declares_the_public_surface() {
    let generated = c_emit::emit_protocol(&demo_spec()).expect("emit");
    assert_eq!(generated.header_name, "demo_bus_protocol.h");
    assert_eq!(generated.source_name, "demo_bus_protocol.c");

    let h = &generated.header;
    assert!(h.contains("#ifndef BUSGEN_DEMO_BUS_PROTOCOL_H"));
    assert!(h.contains("BUSGEN_DEMO_BUS_STATUS_ID = 258"));
    assert!(h.contains("BUSGEN_DEMO_BUS_STATUS_DLC = 4"));
    assert!(h.contains("} busgen_demo_bus_status_t;"));
    assert!(h.contains("int busgen_demo_bus_encode_status("));
    assert!(h.contains("int busgen_demo_bus_decode_status("));
    assert!(h.contains("BUSGEN_OK = 0"));
    assert!(h.contains("BUSGEN_ERR_RANGE = -3"));
    assert!(h.contains("uint64_t counter;"));
    assert!(h.contains("int64_t temp;"));
}

#[test]
fn source_carries_bit_positions_in_payload_order() {
    let generated = c_emit::emit_protocol(&demo_spec()).expect("emit");
    let c = &generated.source;
    assert!(c.contains("#include \"demo_bus_protocol.h\""));
    assert!(c.contains(
        "static const uint32_t busgen_demo_bus_status_counter_bits[4] = {0U, 1U, 2U, 3U};"
    ));
    // Motorola: start bit 15 is the MSB; the LSB lands at bit 20 of byte 2.
    assert!(c.contains(
        "static const uint32_t busgen_demo_bus_status_temp_bits[12] = \
         {20U, 21U, 22U, 23U, 8U, 9U, 10U, 11U, 12U, 13U, 14U, 15U};"
    ));
    assert!(c.contains("if (in->counter > 15ULL) {"));
    assert!(c.contains("if (in->temp < -2048LL || in->temp > 2047LL) {"));
    assert!(c.contains("raw |= ~0xFFFULL;"));
}

#[test]
fn driver_dispatches_every_message() {
    let driver = c_emit::emit_roundtrip_driver(&demo_spec()).expect("driver");
    assert!(driver.contains("#include \"demo_bus_protocol.h\""));
    assert!(driver.contains("case 0U: {"));
    assert!(driver.contains("busgen_demo_bus_encode_status(payload, sizeof(payload), &in);"));
    assert!(driver.contains("busgen_demo_bus_decode_status(payload, sizeof(payload), &decoded);"));
    assert!(driver.contains("int main(void)"));
}

#[test]
fn sanitization_collisions_are_surfaced() {
    let mut spec = demo_spec();
    spec.messages[0].signals[1].name = "counter!".to_string();
    let err = c_emit::emit_protocol(&spec).expect_err("colliding names must fail");
    assert!(err.message.contains("counter"));
}

use dbpf_resource::{
    error::Result, NameMap, Resource, ResourceRegistry, StringTable, TextResource,
};
use pretty_assertions::assert_eq;
use std::io::Cursor;
use tracing::info;
use tracing_test::traced_test;

fn samples() -> Result<Vec<(u32, Vec<u8>)>> {
    let mut table = StringTable::new();
    table.insert(0x0000_0001, "Sul Sul");
    table.insert(0x0000_0002, "Dag Dag");

    let mut names = NameMap::new();
    names.insert(0x00B2_D882_DE1F_0C1E, "cas_part");
    names.insert(0x0000_0000_0000_0001, "tuning");

    Ok(vec![
        (0x220557DA, table.serialize()?),
        (0x0166038C, names.serialize()?),
        (0x03B33DDF, TextResource::new("<I c=\"Buff\"/>").serialize()?),
        (0x62E94D38, b"\xEF\xBB\xBF<M/>".to_vec()),
        (0x00B2D882, vec![0, 1, 2, 3, 4, 5]),
    ])
}

#[traced_test]
#[test]
fn every_builtin_kind_round_trips() -> Result<()> {
    let registry = ResourceRegistry::with_defaults();

    for (type_id, bytes) in samples()? {
        let resource = registry.create_resource(0, type_id, Cursor::new(bytes.clone()))?;
        info!("{type_id:08X} parsed as {}", resource.type_name());

        assert!(!resource.is_changed());
        assert_eq!(resource.serialize()?, bytes);
    }

    Ok(())
}

#[test]
fn edits_through_a_boxed_resource() -> Result<()> {
    let registry = ResourceRegistry::with_defaults();
    let (type_id, bytes) = samples()?.remove(0);

    let mut resource = registry.create_from_bytes(0, type_id, &bytes)?;
    if let Some(table) = resource.downcast_mut::<StringTable>() {
        table.insert(0x0000_0003, "Nooboo");
    }

    assert!(resource.is_changed());
    let edited = resource.serialize()?;
    let reparsed = registry.create_from_bytes(0, type_id, &edited)?;
    assert_eq!(
        reparsed.downcast_ref::<StringTable>().and_then(|t| t.get(3)),
        Some("Nooboo")
    );

    resource.mark_saved();
    assert!(!resource.is_changed());

    Ok(())
}

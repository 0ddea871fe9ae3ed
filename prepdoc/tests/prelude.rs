use prepdoc::{bson::doc, memory::InMemoryDriver, prelude::*};

#[tokio::test]
async fn prelude_covers_a_round_trip() -> QueryResult<()> {
    let driver = InMemoryDriver::builder().build().await?;

    let mut insert = PreparedStatement::new(&driver, r#"{"collection":"users","name":"?","age":"?"}"#)?;
    insert.bind_string("name", "alice")?.bind_int("age", 30)?;
    insert.insert().await?;
    insert.bind_string("name", "bob")?.bind_int("age", 30)?;
    insert.insert().await?;

    let mut find = PreparedStatement::new(
        &driver,
        r#"{"collection":"users","age":"?","projection":{"name":1,"_id":0}}"#,
    )?;
    find.bind_int("age", 30)?;

    assert_eq!(find.find().await?, vec![doc! { "name": "alice" }, doc! { "name": "bob" }]);

    let CompiledCommand::Query(query) = find.compile()? else {
        panic!("expected a query");
    };
    assert_eq!(query.filter, doc! { "age": 30 });

    insert.close();
    find.close();
    Ok(())
}

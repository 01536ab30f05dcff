use anyhow::{bail, Context, Result};
use std::env;
use std::sync::Arc;

use registration_intake::{
    env_vars, load_config_from_env, registration_registry, Collaborators, CorrelationLedger,
    Database, DispatchError, QueueRecord, RecordStore, ReferenceData,
};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");
    let argument = args.get(2).map(String::as_str);

    match (command, argument) {
        ("init", _) => run_init(),
        ("seed", path) => run_seed(path),
        ("validate", Some(path)) => run_queue(path, false),
        ("process", Some(path)) => run_queue(path, true),
        ("lookup", Some(correlation_id)) => run_lookup(correlation_id),
        ("help", _) | ("--help", _) | ("-h", _) => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown or incomplete command: {}", args[1..].join(" "))
        }
    }
}

fn print_usage() {
    println!("registration-intake {}", registration_intake::VERSION);
    println!();
    println!("USAGE:");
    println!("  registration-intake init                      create the database schema");
    println!("  registration-intake seed [reference.json]     load reference data (defaults if omitted)");
    println!("  registration-intake validate <queue.json>     dry-run queue records");
    println!("  registration-intake process <queue.json>      register queue records");
    println!("  registration-intake lookup <correlation-id>   show the entity a correlation id maps to");
    println!();
    println!("ENVIRONMENT:");
    println!("  {}  database file (default {})", env_vars::DB_PATH, env_vars::DEFAULT_DB_PATH);
    println!("  {}   reconciler config JSON", env_vars::CONFIG);
}

fn db_path() -> String {
    env::var(env_vars::DB_PATH).unwrap_or_else(|_| env_vars::DEFAULT_DB_PATH.to_string())
}

fn open_database() -> Result<Arc<Database>> {
    let path = db_path();
    let db = Database::open(&path).with_context(|| format!("Cannot open database at {}", path))?;
    Ok(Arc::new(db))
}

fn run_init() -> Result<()> {
    println!("🗄️  Initializing registration database");
    let db = open_database()?;
    println!("✓ Schema ready at {} ({} patients)", db_path(), db.count()?);
    Ok(())
}

fn run_seed(path: Option<&str>) -> Result<()> {
    let reference = match path {
        Some(path) => ReferenceData::from_file(path)?,
        None => ReferenceData::defaults(),
    };

    let db = open_database()?;
    let rows = db.seed(&reference)?;

    println!("✓ Seeded {} reference rows", rows);
    println!("  identifier types: {}", reference.identifier_types.len());
    println!("  attribute types:  {}", reference.attribute_types.len());
    println!("  locations:        {}", reference.locations.len());
    Ok(())
}

fn run_queue(path: &str, persist: bool) -> Result<()> {
    let records = QueueRecord::load_all(path)?;
    let db = open_database()?;
    let registry = registration_registry(load_config_from_env()?, Collaborators::shared(db.clone()))?;

    println!(
        "📬 {} {} queue record(s) from {}",
        if persist { "Processing" } else { "Validating" },
        records.len(),
        path
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut failed = 0;

    for record in &records {
        let result = if persist {
            registry.process(record).map(|outcome| {
                let status = if outcome.created { "created" } else { "already registered" };
                (format!("{} {}", status, outcome.entity_id), outcome.warnings)
            })
        } else {
            registry
                .validate(record)
                .map(|warnings| ("valid".to_string(), warnings))
        };

        match result {
            Ok((summary, warnings)) => {
                println!("✅ {}: {}", record.uuid, summary);
                for warning in warnings {
                    println!("   ⚠️  {}", warning);
                }
            }
            Err(DispatchError::Failed(failures)) => {
                failed += 1;
                println!("❌ {}: {}", record.uuid, failures);
            }
            Err(e) => {
                failed += 1;
                println!("❌ {}: {}", record.uuid, e);
            }
        }
    }

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ {} passed, {} failed", records.len() - failed, failed);
    println!("✓ Database contains {} patients", db.count()?);

    if failed > 0 {
        bail!("{} queue record(s) failed", failed);
    }
    Ok(())
}

fn run_lookup(correlation_id: &str) -> Result<()> {
    let db = open_database()?;

    let Some(entry) = db.find(correlation_id)? else {
        println!("❌ No registration for correlation id {}", correlation_id);
        return Ok(());
    };

    println!("🔍 {} → {}", entry.temporary_id, entry.permanent_id);
    println!("   registered at {}", entry.created_at.to_rfc3339());

    if let Some(patient) = db.get_patient(&entry.permanent_id)? {
        let name = patient
            .name
            .as_ref()
            .map(|n| n.full_name())
            .unwrap_or_else(|| "(no name)".to_string());
        println!("   name: {}  sex: {}", name, patient.sex);
        for identifier in &patient.identifiers {
            let marker = if identifier.preferred { " (preferred)" } else { "" };
            println!("   {}: {}{}", identifier.type_name, identifier.value, marker);
        }
    }

    for event in db.events_for_patient(&entry.permanent_id)? {
        println!("   [{}] {}", event.timestamp.to_rfc3339(), event.event_type);
    }

    Ok(())
}

use env_logger::Env;
use labelstore::metadata::database_store::DatabaseStore;
use labelstore::metadata::store_trait::MetadataStore;
use labelstore::metadata::types::{BoundingBox, MetricValue, Metrics, TrainingStatus};
use labelstore::StoreConfig;
use log::info;
use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    // Initialize logger (RUST_LOG can override; default to info)
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info")).try_init();

    // Choose an output directory for the demo database
    let out_dir: PathBuf = env::var("STORE_DEMO_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            env::current_dir()
                .expect("cwd")
                .join("target")
                .join("store_demo")
        });
    fs::create_dir_all(&out_dir).expect("create output dir");

    let db_path = out_dir.join("labelstore_demo.sqlite3");
    info!("Opening metadata store at {}", db_path.display());
    let store = DatabaseStore::open(&db_path, StoreConfig::default()).expect("open store");

    // An agent uploads two captured images
    let agent_id = store
        .register_agent("capture-host-01", "alice")
        .expect("register agent");
    let img1 = store
        .record_image(agent_id, "/data/captures/0001.jpg")
        .expect("record image 1");
    let img2 = store
        .record_image(agent_id, "/data/captures/0002.jpg")
        .expect("record image 2");
    info!("Agent {} uploaded images {} and {}", agent_id, img1, img2);

    // A labeling session annotates the first image
    let cat = store.ensure_label("cat").expect("ensure label cat");
    let dog = store.ensure_label("dog").expect("ensure label dog");
    // calling ensure_label again resolves to the same id
    assert_eq!(store.ensure_label("cat").expect("ensure again"), cat);
    store
        .add_label_metadata(img1, cat, BoundingBox::new(12.0, 8.0, 96.0, 77.0))
        .expect("annotate cat");
    store
        .add_label_metadata(img1, dog, BoundingBox::new(120.0, 30.0, 310.0, 240.0))
        .expect("annotate dog");
    info!(
        "Image {} now carries {} ground-truth annotations",
        img1,
        store.list_label_metadata(img1).expect("list metadata").len()
    );

    // The training orchestrator runs a job for a new model version
    let model_v1 = store.create_model("v1.0.0").expect("create model");
    let job = store.start_training_job(model_v1).expect("start job");
    let mut metrics = Metrics::new();
    metrics.insert(String::from("loss"), MetricValue::Number(0.042));
    metrics.insert(String::from("epochs"), MetricValue::Number(50.0));
    metrics.insert(
        String::from("optimizer"),
        MetricValue::Text(String::from("adamw")),
    );
    store
        .update_training_job(job, TrainingStatus::Completed, Some(metrics))
        .expect("complete job");
    store.activate_model(model_v1).expect("activate model");
    info!(
        "Model v1.0.0 trained and activated; job finished at {:?}",
        store
            .get_training_job(job)
            .expect("fetch job")
            .completed_at
    );

    // The inference service records detections for the second image,
    // including a class outside the curated vocabulary
    store
        .record_prediction(img2, BoundingBox::new(5.0, 5.0, 60.0, 44.0), "cat", 0.91)
        .expect("prediction 1");
    store
        .record_prediction(
            img2,
            BoundingBox::new(80.0, 10.0, 200.0, 150.0),
            "raccoon",
            0.33,
        )
        .expect("prediction 2");

    // Walk the store back out
    for agent in store.list_agents().expect("list agents") {
        info!(
            "agent {}@{} registered at {}",
            agent.username, agent.hostname, agent.created_at
        );
        for image in store.list_images(agent.id).expect("list images") {
            info!("  image {} ({})", image.file_path, image.id);
            for md in store.list_label_metadata(image.id).expect("list metadata") {
                let label = store.get_label(md.label_id).expect("get label");
                info!("    ground truth: {} at {:?}", label.name, md.bbox);
            }
            for p in store.list_predictions(image.id).expect("list predictions") {
                info!(
                    "    prediction: {} ({:.2}) at {:?}",
                    p.label, p.confidence, p.bbox
                );
            }
        }
    }
    let active = store.active_model().expect("active model");
    info!(
        "Active model: {:?}",
        active.map(|m| m.version)
    );

    // Export a JSON summary for inspection
    let labels = store.list_labels().expect("list labels");
    let summary_path = out_dir.join("labels.json");
    let json = serde_json::to_string_pretty(&labels).expect("serialize labels");
    fs::write(&summary_path, json).expect("write labels json");
    info!(
        "Demo complete. Inspect {} and {}",
        db_path.display(),
        summary_path.display()
    );
}

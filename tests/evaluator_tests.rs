//! End-to-end evaluation tests: YAML templates in, solver constraints out.

use std::sync::Arc;

use indexmap::IndexMap;
use pretty_assertions::assert_eq;

use masonry::{
    Constraint, ConstructRequest, Evaluator, MasonryError, PropertyInfo, Resource, ResourceGraph,
    ResourceId, ResourceInfo, Solution, TemplateStore, Urn, Value,
};

const BUCKET: &str = r#"
id: masonry.aws.Bucket
version: "1.0"
inputs:
  bucketName:
    type: string
    required: true
    sanitize:
      pattern: '[^a-z0-9-]'
      replace: '-'
  versioned:
    type: bool
    default: false
  maxAge:
    type: int
    default: 3600
resources:
  bucket:
    type: aws:s3_bucket
    name: ${inputs:bucketName}
    properties:
      bucketName: ${inputs:bucketName}
      maxAge: ${inputs:maxAge}
      logsName: ${inputs:bucketName}-logs
input_rules:
  - if: "{{ .Inputs.versioned }}"
    then:
      resources:
        versioning:
          type: aws:s3_bucket_versioning
          properties:
            bucket: ${resources:bucket#bucketName}
      edges:
        - from: versioning
          to: bucket
outputs:
  BucketName:
    value: ${inputs:bucketName}
  BucketArn:
    value: ${resources:bucket#arn}
"#;

const FUNCTION: &str = r#"
id: masonry.aws.Function
inputs:
  handler:
    type: string
    default: index.handler
  bucket:
    type: construct(masonry.aws.Bucket)
resources:
  function:
    type: aws:lambda_function
    properties:
      handler: ${inputs:handler}
outputs:
  FunctionName:
    value: ${resources:function#functionName}
"#;

const FUNCTION_TO_BUCKET: &str = r#"
from: masonry.aws.Function
to: masonry.aws.Bucket
priority: 1
resources:
  function:
    type: aws:lambda_function
    properties:
      environment:
        BUCKET_NAME: ${to:inputs.bucketName}
edges:
  - from: function
    to: ${to:resources.bucket}
outputs:
  BoundBucket:
    value: ${to:inputs.bucketName}
"#;

const TOPICS: &str = r#"
id: masonry.test.Topics
inputs:
  topics:
    type: map(string, string)
    required: true
input_rules:
  - for_each: "${inputs:topics}"
    prefix: "${key}"
    do:
      resources:
        topic:
          type: aws:sns_topic
          properties:
            displayName: ${selected}
"#;

fn init_tracing() {
    // try_init so repeated calls across tests are harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_test_writer()
        .try_init();
}

fn store() -> Arc<TemplateStore> {
    init_tracing();
    let store = TemplateStore::new();
    store.register_construct_yaml(BUCKET).unwrap();
    store.register_construct_yaml(FUNCTION).unwrap();
    store.register_construct_yaml(TOPICS).unwrap();
    Arc::new(store)
}

fn inputs(yaml: &str) -> IndexMap<String, Value> {
    match Value::from(serde_yaml::from_str::<serde_yaml::Value>(yaml).unwrap()) {
        Value::Map(map) => map,
        other => panic!("expected map inputs, got {other:?}"),
    }
}

fn request(urn: &str, input_yaml: &str) -> ConstructRequest {
    ConstructRequest {
        urn: urn.parse().unwrap(),
        inputs: inputs(input_yaml),
    }
}

fn bucket_request(input_yaml: &str) -> ConstructRequest {
    request("urn:acct:proj:dev:app:construct/masonry.aws.Bucket:assets", input_yaml)
}

fn id(s: &str) -> ResourceId {
    s.parse().unwrap()
}

fn applications(constraints: &[Constraint]) -> Vec<&ResourceId> {
    constraints
        .iter()
        .filter_map(|c| match c {
            Constraint::Application { node, .. } => Some(node),
            _ => None,
        })
        .collect()
}

fn property_value<'a>(
    constraints: &'a [Constraint],
    target_id: &ResourceId,
    name: &str,
) -> &'a Value {
    constraints
        .iter()
        .find_map(|c| match c {
            Constraint::Resource { target, property, value, .. }
                if target == target_id && property == name =>
            {
                Some(value)
            }
            _ => None,
        })
        .unwrap_or_else(|| panic!("no property constraint '{name}' on '{target_id}'"))
}

#[test]
fn bucket_evaluates_to_constraints() {
    let evaluator = Evaluator::new(store());
    let solve = evaluator.evaluate(bucket_request("bucketName: assets")).unwrap();

    assert_eq!(applications(&solve.constraints), vec![&id("aws:s3_bucket:assets")]);

    let bucket = id("aws:s3_bucket:assets");
    assert_eq!(
        property_value(&solve.constraints, &bucket, "bucketName"),
        &Value::String("assets".to_string())
    );

    let outputs: Vec<(&str, &Constraint)> = solve
        .constraints
        .iter()
        .filter_map(|c| match c {
            Constraint::Output { name, .. } => Some((name.as_str(), c)),
            _ => None,
        })
        .collect();
    assert_eq!(
        outputs.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
        vec!["BucketArn", "BucketName"]
    );
    match outputs[0].1 {
        Constraint::Output { property_ref: Some(r), value: None, .. } => {
            assert_eq!(r.to_string(), "aws:s3_bucket:assets#arn");
        }
        other => panic!("expected property reference output, got {other:?}"),
    }
    match outputs[1].1 {
        Constraint::Output { property_ref: None, value: Some(v), .. } => {
            assert_eq!(v, &Value::String("assets".to_string()));
        }
        other => panic!("expected value output, got {other:?}"),
    }
}

#[test]
fn typed_values_survive_interpolation() {
    let evaluator = Evaluator::new(store());
    let solve = evaluator
        .evaluate(bucket_request("bucketName: assets\nmaxAge: 7"))
        .unwrap();
    let bucket = id("aws:s3_bucket:assets");
    assert_eq!(property_value(&solve.constraints, &bucket, "maxAge"), &Value::Int(7));
}

#[test]
fn int_default_applies_when_unset() {
    let evaluator = Evaluator::new(store());
    let solve = evaluator.evaluate(bucket_request("bucketName: assets")).unwrap();
    let bucket = id("aws:s3_bucket:assets");
    assert_eq!(property_value(&solve.constraints, &bucket, "maxAge"), &Value::Int(3600));
}

#[test]
fn embedded_group_splices_into_text() {
    let evaluator = Evaluator::new(store());
    let solve = evaluator.evaluate(bucket_request("bucketName: assets")).unwrap();
    let bucket = id("aws:s3_bucket:assets");
    assert_eq!(
        property_value(&solve.constraints, &bucket, "logsName"),
        &Value::String("assets-logs".to_string())
    );
}

#[test]
fn conditional_rule_expands_when_enabled() {
    let evaluator = Evaluator::new(store());
    let solve = evaluator
        .evaluate(bucket_request("bucketName: assets\nversioned: true"))
        .unwrap();

    // The versioning -> bucket edge puts versioning first.
    assert_eq!(
        applications(&solve.constraints),
        vec![
            &id("aws:s3_bucket_versioning:versioning"),
            &id("aws:s3_bucket:assets"),
        ]
    );

    let versioning = id("aws:s3_bucket_versioning:versioning");
    assert_eq!(
        property_value(&solve.constraints, &versioning, "bucket"),
        &Value::Ref("aws:s3_bucket:assets#bucketName".parse().unwrap())
    );

    let edges: Vec<&Constraint> = solve
        .constraints
        .iter()
        .filter(|c| matches!(c, Constraint::Edge { .. }))
        .collect();
    assert_eq!(edges.len(), 1);
    match edges[0] {
        Constraint::Edge { source, target, .. } => {
            assert_eq!(source, &id("aws:s3_bucket_versioning:versioning"));
            assert_eq!(target, &id("aws:s3_bucket:assets"));
        }
        _ => unreachable!(),
    }
}

#[test]
fn conditional_rule_skips_when_disabled() {
    let evaluator = Evaluator::new(store());
    let solve = evaluator.evaluate(bucket_request("bucketName: assets")).unwrap();
    assert_eq!(applications(&solve.constraints).len(), 1);
    assert!(!solve.constraints.iter().any(|c| matches!(c, Constraint::Edge { .. })));
}

#[test]
fn for_each_expands_map_keys_in_sorted_order() {
    let evaluator = Evaluator::new(store());
    let solve = evaluator
        .evaluate(request(
            "urn:acct:proj:dev:app:construct/masonry.test.Topics:t",
            "topics:\n  zeta: Z\n  alpha: A",
        ))
        .unwrap();

    assert_eq!(
        applications(&solve.constraints),
        vec![&id("aws:sns_topic:alpha.topic"), &id("aws:sns_topic:zeta.topic")]
    );
    assert_eq!(
        property_value(&solve.constraints, &id("aws:sns_topic:alpha.topic"), "displayName"),
        &Value::String("A".to_string())
    );
    assert_eq!(
        property_value(&solve.constraints, &id("aws:sns_topic:zeta.topic"), "displayName"),
        &Value::String("Z".to_string())
    );
}

#[test]
fn evaluation_is_deterministic_across_runs() {
    let run = || {
        let evaluator = Evaluator::new(store());
        let solve = evaluator
            .evaluate(bucket_request("bucketName: assets\nversioned: true"))
            .unwrap();
        serde_json::to_string(&solve.constraints).unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn required_input_missing_errors() {
    let evaluator = Evaluator::new(store());
    let err = evaluator.evaluate(bucket_request("versioned: true")).unwrap_err();
    assert!(err.to_string().contains("inputs"), "unexpected error: {err:#}");
    assert!(
        format!("{err:#}").contains("bucketName"),
        "unexpected error: {err:#}"
    );
}

#[test]
fn unknown_input_errors() {
    let evaluator = Evaluator::new(store());
    let err = evaluator
        .evaluate(bucket_request("bucketName: assets\nbogus: 1"))
        .unwrap_err();
    assert!(format!("{err:#}").contains("unknown input 'bogus'"));
}

#[test]
fn sanitized_input_is_accepted_with_corrected_value() {
    let evaluator = Evaluator::new(store());
    let solve = evaluator.evaluate(bucket_request("bucketName: My Bucket")).unwrap();

    // The corrected value flows through the resource name and outputs.
    assert_eq!(applications(&solve.constraints), vec![&id("aws:s3_bucket:-y--ucket")]);
    let name_output = solve
        .constraints
        .iter()
        .find_map(|c| match c {
            Constraint::Output { name, value, .. } if name == "BucketName" => Some(value),
            _ => None,
        })
        .unwrap();
    assert_eq!(name_output, &Some(Value::String("-y--ucket".to_string())));
}

#[test]
fn binding_merges_into_dependent_construct() {
    let store = store();
    store.register_binding_yaml(FUNCTION_TO_BUCKET).unwrap();
    let evaluator = Evaluator::new(store);

    evaluator.evaluate(bucket_request("bucketName: assets")).unwrap();
    let solve = evaluator
        .evaluate(request(
            "urn:acct:proj:dev:app:construct/masonry.aws.Function:uploader",
            "bucket: urn:acct:proj:dev:app:construct/masonry.aws.Bucket:assets",
        ))
        .unwrap();

    let function = id("aws:lambda_function:function");
    assert_eq!(
        property_value(&solve.constraints, &function, "handler"),
        &Value::String("index.handler".to_string())
    );
    match property_value(&solve.constraints, &function, "environment") {
        Value::Map(env) => {
            assert_eq!(env["BUCKET_NAME"], Value::String("assets".to_string()));
        }
        other => panic!("expected environment map, got {other:?}"),
    }

    // The binding edge crosses into the bucket construct's resources.
    let edge = solve
        .constraints
        .iter()
        .find(|c| matches!(c, Constraint::Edge { .. }))
        .unwrap();
    match edge {
        Constraint::Edge { source, target, .. } => {
            assert_eq!(source, &function);
            assert_eq!(target, &id("aws:s3_bucket:assets"));
        }
        _ => unreachable!(),
    }

    let output_names: Vec<&str> = solve
        .constraints
        .iter()
        .filter_map(|c| match c {
            Constraint::Output { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(output_names, vec!["BoundBucket", "FunctionName"]);
}

#[test]
fn unevaluated_dependency_errors() {
    let evaluator = Evaluator::new(store());
    let err = evaluator
        .evaluate(request(
            "urn:acct:proj:dev:app:construct/masonry.aws.Function:uploader",
            "bucket: urn:acct:proj:dev:app:construct/masonry.aws.Bucket:assets",
        ))
        .unwrap_err();
    assert!(
        matches!(err.downcast_ref(), Some(MasonryError::UrnNotFound(_))),
        "unexpected error: {err:#}"
    );
}

struct FakeSolution {
    graph: ResourceGraph,
    infos: IndexMap<ResourceId, ResourceInfo>,
}

impl Solution for FakeSolution {
    fn dataflow_graph(&self) -> &ResourceGraph {
        &self.graph
    }

    fn resource_info(&self, id: &ResourceId) -> Result<ResourceInfo, MasonryError> {
        Ok(self.infos.get(id).cloned().unwrap_or_default())
    }
}

fn bucket_solution() -> Arc<FakeSolution> {
    let mut graph = ResourceGraph::new();
    graph.add_vertex(Resource::new(id("aws:s3_bucket:assets")));

    let mut info = ResourceInfo::default();
    info.properties.insert(
        "arn".to_string(),
        PropertyInfo {
            deploy_time: true,
            required: true,
        },
    );
    let mut infos = IndexMap::new();
    infos.insert(id("aws:s3_bucket:assets"), info);
    Arc::new(FakeSolution { graph, infos })
}

fn bucket_urn() -> Urn {
    "urn:acct:proj:dev:app:construct/masonry.aws.Bucket:assets".parse().unwrap()
}

#[test]
fn dry_run_imports_dependency_preview_placeholders() {
    let evaluator = Evaluator::new(store()).with_dry_run(true);
    evaluator.evaluate(bucket_request("bucketName: assets")).unwrap();
    evaluator.attach_solution(&bucket_urn(), bucket_solution()).unwrap();

    let solve = evaluator
        .evaluate(request(
            "urn:acct:proj:dev:app:construct/masonry.aws.Function:uploader",
            "bucket: urn:acct:proj:dev:app:construct/masonry.aws.Bucket:assets",
        ))
        .unwrap();

    let imported = solve.initial_state.vertex(&id("aws:s3_bucket:assets")).unwrap();
    assert_eq!(
        imported.properties["arn"],
        Value::String("preview(id=aws:s3_bucket:assets)".to_string())
    );
}

#[test]
fn live_state_is_preferred_over_placeholders() {
    let evaluator = Evaluator::new(store());
    evaluator.evaluate(bucket_request("bucketName: assets")).unwrap();
    evaluator.attach_solution(&bucket_urn(), bucket_solution()).unwrap();

    let mut live = Resource::new(id("aws:s3_bucket:assets"));
    live.properties
        .insert("arn".to_string(), Value::String("arn:aws:s3:::assets".to_string()));
    evaluator.register_state(bucket_urn(), vec![live]);

    let solve = evaluator
        .evaluate(request(
            "urn:acct:proj:dev:app:construct/masonry.aws.Function:uploader",
            "bucket: urn:acct:proj:dev:app:construct/masonry.aws.Bucket:assets",
        ))
        .unwrap();

    let imported = solve.initial_state.vertex(&id("aws:s3_bucket:assets")).unwrap();
    assert_eq!(
        imported.properties["arn"],
        Value::String("arn:aws:s3:::assets".to_string())
    );
}

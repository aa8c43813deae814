use htcflow_core::config::Config;
use htcflow_core::constants::{attrs, job_types};
use htcflow_dag::site::PoolInfo;
use htcflow_dag::{Dag, DagBuilder};
use htcflow_test_utils::{JobSpecBuilder, WorkflowBuilder};
use serde_json::Value;

struct Pool(Option<i64>);

impl PoolInfo for Pool {
    fn max_slot_memory(&self, _machine_pattern: &str) -> htcflow_dag::Result<Option<i64>> {
        Ok(self.0)
    }
}

fn build(graph: &htcflow_core::workflow::WorkflowGraph) -> Dag {
    let config = Config::default();
    let pool = Pool(Some(16384));
    DagBuilder::new(&config, &pool, "/submit/u_run")
        .build(graph)
        .unwrap()
}

fn two_job_group(name: &str) -> htcflow_core::workflow::WorkflowGraph {
    WorkflowBuilder::new(name)
        .payload(&format!("{}_a", name), "label2")
        .payload(&format!("{}_b", name), "label2")
        .edge(&format!("{}_a", name), &format!("{}_b", name))
        .build()
}

#[test]
fn test_check_job_sits_between_group_and_every_successor() {
    let graph = WorkflowBuilder::new("u_run")
        .payload("pipetaskInit", "pipetaskInit")
        .group("group1", "label2", false, two_job_group("group1"))
        .payload("after1", "label3")
        .payload("after2", "label3")
        .edge("pipetaskInit", "group1")
        .fan_out("group1", &["after1", "after2"])
        .build();
    let dag = build(&graph);

    let check = "wms_check_status_wms_group1";
    assert_eq!(dag.job(check).unwrap().job_type, job_types::CHECK);
    assert_eq!(dag.children("wms_group1").collect::<Vec<_>>(), vec![check]);
    let mut after: Vec<_> = dag.children(check).collect();
    after.sort();
    assert_eq!(after, vec!["after1", "after2"]);
    for job in ["after1", "after2"] {
        assert_eq!(dag.parents(job).collect::<Vec<_>>(), vec![check]);
    }
    assert_eq!(dag.parents("wms_group1").collect::<Vec<_>>(), vec!["pipetaskInit"]);
}

#[test]
fn test_job_kind_counts_cover_nested_and_final_jobs() {
    for n in [1, 3] {
        let mut builder = WorkflowBuilder::new("u_run");
        for i in 0..n {
            builder = builder.payload(&format!("job{}", i), "label1");
        }
        let graph = builder
            .noop("sync", "noop")
            .group("group1", "label2", true, two_job_group("group1"))
            .final_job(JobSpecBuilder::new("finalJob", "finalJob"))
            .edge("job0", "sync")
            .edge("sync", "group1")
            .build();
        let dag = build(&graph);

        let summary = dag.attrs[attrs::WORKFLOW_JOB_SUMMARY].as_str().unwrap();
        assert_eq!(summary, format!("payload:{};noop:1;subdag:1", n + 3));
    }
}

#[test]
fn test_run_attrs_and_summaries_land_on_the_dag() {
    let graph = WorkflowBuilder::new("u_run")
        .run_attr("bps_run", "u_run")
        .run_attr("bps_operator", "jdoe")
        .job(JobSpecBuilder::new("a", "label1").quanta("label1", 2))
        .payload("b", "label2")
        .edge("a", "b")
        .build();
    let dag = build(&graph);

    assert_eq!(dag.attrs["bps_run"], Value::from("u_run"));
    assert_eq!(dag.attrs[attrs::JOB_SUMMARY], Value::from("label1:1;label2:1"));
    assert_eq!(dag.attrs[attrs::RUN_QUANTA], Value::from("label1:2;label2:1"));
}

#[test]
fn test_memory_autoscaling_uses_pool_ceiling() {
    let graph = WorkflowBuilder::new("u_run")
        .job(
            JobSpecBuilder::new("a", "label1")
                .memory(2048)
                .memory_autoscale(2.0, None)
                .retries(3),
        )
        .build();
    let dag = build(&graph);

    let job = dag.job("a").unwrap();
    assert!(job.commands["request_memory"].contains("min({int(2048 * pow(2.0, NumJobStarts)), 16384})"));
    assert!(job.commands.contains_key("periodic_release"));
    assert!(job.commands.contains_key("periodic_remove"));
}

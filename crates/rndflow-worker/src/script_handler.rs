// ScriptHandler: runs the job script inside the job root.
//
// The script is embedded in a bash wrapper that timestamps every output line
// and appends it to the job log, while exiting with the script's own exit
// code rather than the pipeline's.

use anyhow::{Context, Result};
use rndflow_client::JobSpec;
use rndflow_common::constants::variables;
use rndflow_common::{HostContext, Tracing};
use rndflow_sdk::{ProcessInvoker, TraceWriter};
use std::sync::Arc;

use crate::job::Job;

const SHELL: &str = "/bin/bash";

/// Runs in place of an empty script, failing the job.
pub const EMPTY_SCRIPT: &str = "echo 'Empty script: nothing to do :('\nexit 1";

pub struct ScriptHandler {
    context: Arc<HostContext>,
    trace: Tracing,
}

impl ScriptHandler {
    pub fn new(context: Arc<HostContext>) -> Self {
        let trace = context.get_trace("ScriptHandler");
        Self { context, trace }
    }

    /// The command to run for `spec`.
    ///
    /// Interactive jobs start a notebook server instead of the script, but
    /// only when an external base URL is configured.
    pub fn script_body(spec: &JobSpec, jupyter_base_url: Option<&str>) -> String {
        if let (true, Some(base_url)) = (spec.is_interactive, jupyter_base_url) {
            return format!(
                "$jupyter_interactive --allow-root --no-browser --ip='*' \
                 --NotebookApp.base_url={base_url} --NotebookApp.token=''"
            );
        }
        match spec.node.script.as_deref() {
            Some(script) if !script.trim().is_empty() => script.to_string(),
            _ => EMPTY_SCRIPT.to_string(),
        }
    }

    /// Wrap `body` so that its output is stamped with `date_format` and
    /// appended to `log_name`.
    pub fn build_wrapper(body: &str, log_name: &str, date_format: &str) -> String {
        format!(
            r#"if ! command -v tee > /dev/null; then
    echo "tee is not installed in the container!" >> {log_name}
    exit 1
fi
if command -v ts > /dev/null; then
    stamp() {{ ts "[{date_format}]"; }}
else
    stamp() {{
        while IFS= read -r line || [ -n "$line" ]; do
            printf '[%s] %s\n' "$(date '+{date_format}')" "$line"
        done
    }}
fi
if command -v jupyter-lab > /dev/null; then
    jupyter_interactive=jupyter-lab
else
    jupyter_interactive=jupyter-notebook
fi
(
{body}
) 2>&1 | stamp | tee -a {log_name}
rc=${{PIPESTATUS[0]}}
exit $rc
"#
        )
    }

    /// Run the script of `spec` for `job` and return its exit code.
    ///
    /// A non-zero exit code is a result, not an error. Errors mean the shell
    /// could not be started or waited on, or the run was cancelled by a
    /// shutdown.
    pub async fn run(&self, job: &Job, spec: &JobSpec) -> Result<i32> {
        let settings = self.context.settings();
        let body = Self::script_body(spec, settings.jupyter_base_url.as_deref());
        let log_name = job
            .log_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("Job log file has no file name")?;
        let wrapper = Self::build_wrapper(&body, &log_name, &settings.date_format);

        let mut invoker = ProcessInvoker::new(Arc::new(self.trace.clone()));
        let forwarders = [invoker.take_stdout_receiver(), invoker.take_stderr_receiver()]
            .into_iter()
            .flatten()
            .map(|mut rx| {
                let trace = self.trace.clone();
                tokio::spawn(async move {
                    while let Some(line) = rx.recv().await {
                        trace.verbose(&line.data);
                    }
                })
            })
            .collect::<Vec<_>>();

        let result = invoker
            .execute(
                &job.root,
                SHELL,
                &["-c".to_string(), wrapper],
                variables::SCRUBBED_FROM_CHILD,
                self.context.shutdown_token(),
            )
            .await
            .with_context(|| format!("Failed to run the script of job {}", job.id));

        drop(invoker);
        for forwarder in forwarders {
            let _ = forwarder.await;
        }

        let exit_code = result?;
        self.trace
            .info(&format!("Script of job {} exited with code {exit_code}", job.id));
        Ok(exit_code)
    }
}

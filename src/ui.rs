//! Interface de terminal do Oasis: spinner e saída colorida.
//!
//! Usa as crates `indicatif` para o spinner de acompanhamento e `console` para
//! estilização com cores. O [`WorkflowProgress`] acompanha visualmente um
//! workflow enquanto `submit --wait` consulta o servidor.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::api::{ActiveWorkflowsResponse, WorkflowStatusResponse};
use crate::state_machine::WorkflowStatus;

/// Estilo usado para cada status: verde para concluído, vermelho para falha,
/// amarelo para cancelado e ciano para os estados ativos.
fn status_style(status: WorkflowStatus) -> Style {
    match status {
        WorkflowStatus::Completed => Style::new().green().bold(),
        WorkflowStatus::Failed => Style::new().red().bold(),
        WorkflowStatus::Cancelled => Style::new().yellow().bold(),
        WorkflowStatus::Pending | WorkflowStatus::Running => Style::new().cyan(),
    }
}

/// Indicador visual de progresso para um workflow no terminal.
pub struct WorkflowProgress {
    // Spinner do indicatif.
    pb: ProgressBar,
}

impl WorkflowProgress {
    /// Inicia o spinner com o identificador do workflow.
    pub fn start(workflow_id: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("{workflow_id}: submitted"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Self { pb }
    }

    /// Atualiza a mensagem do spinner com o status mais recente.
    pub fn update(&self, status: &WorkflowStatusResponse) {
        self.pb.set_message(format!(
            "{} [{}] {}",
            status.workflow_id,
            status_style(status.status).apply_to(status.status),
            status.message
        ));
    }

    /// Finaliza o spinner e exibe o resultado final.
    pub fn finish(&self, status: &WorkflowStatusResponse) {
        self.pb.finish_and_clear();
        let (mark, style) = match status.status {
            WorkflowStatus::Completed => ("✓", status_style(WorkflowStatus::Completed)),
            WorkflowStatus::Cancelled => ("⊘", status_style(WorkflowStatus::Cancelled)),
            _ => ("✗", status_style(WorkflowStatus::Failed)),
        };
        println!("  {} {}", style.apply_to(mark), status.message);
        if let Some(duration) = status.duration {
            println!("  took {duration:.1}s");
        }
    }
}

/// Imprime o status de um workflow; com `show_logs`, também a saída capturada.
pub fn print_status(status: &WorkflowStatusResponse, show_logs: bool) {
    let dim = Style::new().dim();
    println!(
        "{} {}",
        status.workflow_id,
        status_style(status.status).apply_to(status.status)
    );
    println!("  {} {}", dim.apply_to("message:"), status.message);
    println!("  {} {}", dim.apply_to("query:  "), status.query);
    println!("  {} {}", dim.apply_to("model:  "), status.model);
    println!("  {} {}", dim.apply_to("created:"), status.created_at);
    if let Some(started) = status.started_at {
        println!("  {} {started}", dim.apply_to("started:"));
    }
    if let Some(completed) = status.completed_at {
        println!("  {} {completed}", dim.apply_to("ended:  "));
    }
    if let Some(duration) = status.duration {
        println!("  {} {duration:.1}s", dim.apply_to("took:   "));
    }
    if let Some(failure) = status.failure {
        println!("  {} {failure}", dim.apply_to("failure:"));
    }
    if show_logs {
        println!();
        println!("{}", dim.apply_to("─── Agent output ───"));
        println!("{}", status.logs.as_deref().unwrap_or(""));
    }
}

/// Imprime a lista de workflows ativos, um por linha.
pub fn print_active(active: &ActiveWorkflowsResponse) {
    if active.active_workflows.is_empty() {
        println!("No active workflows");
        return;
    }
    for workflow in &active.active_workflows {
        println!(
            "{} {:<8} {:<10} {}",
            workflow.workflow_id,
            status_style(workflow.status).apply_to(workflow.status),
            workflow.model,
            workflow.query
        );
    }
}

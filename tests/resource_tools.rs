mod common;

use common::{test_app, FakeTransport, Scripted, BASE_URL};
use m365_mgmt::errors::ToolErrorKind;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

async fn call(transport: &std::sync::Arc<FakeTransport>, tool: &str, args: Value) -> (Value, bool) {
    let app = test_app(transport.clone());
    let output = app
        .tool_executor
        .execute(tool, args, CancellationToken::new())
        .await
        .expect("tool call completes");
    (output.payload, output.is_error)
}

#[tokio::test]
async fn list_users_projects_and_counts() {
    let transport = FakeTransport::new();
    transport.route(
        "GET",
        "/v1.0/users",
        vec![Scripted::json(
            200,
            json!({"value": [
                {"id": "u1", "displayName": "Ada", "userPrincipalName": "ada@contoso.test", "mail": null, "jobTitle": "Engineer", "accountEnabled": true, "department": "R&D"},
                {"id": "u2", "displayName": "Grace", "userPrincipalName": "grace@contoso.test"},
            ]}),
        )],
    );

    let (payload, is_error) = call(&transport, "list_users", json!({})).await;

    assert!(!is_error);
    assert_eq!(payload["count"], 2);
    let users = payload["users"].as_array().expect("users");
    assert_eq!(users[0]["displayName"], "Ada");
    assert!(users[0].get("department").is_none());
    assert_eq!(users[1]["mail"], Value::Null);
    assert_eq!(users[1]["accountEnabled"], Value::Null);
}

#[tokio::test]
async fn remote_failures_become_error_payloads() {
    let transport = FakeTransport::new();
    transport.route(
        "GET",
        "/v1.0/groups",
        vec![Scripted::text(403, "{\"error\":{\"code\":\"Authorization_RequestDenied\"}}")],
    );

    let (payload, is_error) = call(&transport, "list_groups", json!({})).await;

    assert!(is_error);
    assert_eq!(payload["status_code"], 403);
    assert_eq!(payload["kind"], "forbidden");
    assert!(payload["error"].as_str().unwrap_or_default().contains("Authorization_RequestDenied"));
    assert!(payload.get("groups").is_none());
}

#[tokio::test]
async fn user_detail_uses_the_detail_projection() {
    let transport = FakeTransport::new();
    transport.route(
        "GET",
        "/v1.0/users/u1",
        vec![Scripted::json(
            200,
            json!({"id": "u1", "displayName": "Ada", "officeLocation": "B41", "businessPhones": ["+1 555"], "onPremisesSyncEnabled": false}),
        )],
    );

    let (payload, is_error) = call(&transport, "get_user_info", json!({"user_id": "u1"})).await;

    assert!(!is_error);
    assert_eq!(payload["officeLocation"], "B41");
    assert_eq!(payload["businessPhones"], json!(["+1 555"]));
    assert!(payload.get("onPremisesSyncEnabled").is_none());
}

#[tokio::test]
async fn group_members_carry_the_group_id() {
    let transport = FakeTransport::new();
    transport.route(
        "GET",
        "/v1.0/groups/g1/members",
        vec![Scripted::json(
            200,
            json!({"value": [{"id": "u1", "displayName": "Ada", "@odata.type": "#microsoft.graph.user"}]}),
        )],
    );

    let (payload, _) = call(&transport, "get_group_members", json!({"group_id": "g1"})).await;

    assert_eq!(payload["groupId"], "g1");
    assert_eq!(payload["count"], 1);
    assert_eq!(payload["members"][0]["displayName"], "Ada");
}

#[tokio::test]
async fn create_user_posts_a_generated_password() {
    let transport = FakeTransport::new();
    transport.route(
        "POST",
        "/v1.0/users",
        vec![Scripted::json(
            201,
            json!({"id": "new-id", "displayName": "Ada", "userPrincipalName": "ada@contoso.test", "mailNickname": "ada", "accountEnabled": true}),
        )],
    );

    let (payload, is_error) = call(
        &transport,
        "create_user",
        json!({"display_name": "Ada", "mail_nickname": "ada", "user_principal_name": "ada@contoso.test"}),
    )
    .await;

    assert!(!is_error);
    assert_eq!(payload["id"], "new-id");
    let password = payload["temporaryPassword"].as_str().expect("password");
    assert_eq!(password.len(), 16);

    let body = transport.calls()[0].body_json();
    assert_eq!(body["accountEnabled"], true);
    assert_eq!(body["mailNickname"], "ada");
    assert_eq!(body["passwordProfile"]["forceChangePasswordNextSignIn"], true);
    assert_eq!(body["passwordProfile"]["password"], password);
}

#[tokio::test]
async fn create_user_requires_its_arguments() {
    let transport = FakeTransport::new();
    let app = test_app(transport.clone());

    let err = app
        .tool_executor
        .execute("create_user", json!({"display_name": "Ada"}), CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ToolErrorKind::InvalidParams);
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn scripts_merge_both_families_with_tags() {
    let transport = FakeTransport::new();
    transport.route(
        "GET",
        "/beta/deviceManagement/deviceManagementScripts",
        vec![Scripted::json(
            200,
            json!({"value": [{"id": "p1", "displayName": "Set wallpaper", "enforceSignatureCheck": false, "createdDateTime": "2024-03-01T10:00:00Z"}]}),
        )],
    );
    transport.route(
        "GET",
        "/beta/deviceManagement/deviceShellScripts",
        vec![Scripted::json(
            200,
            json!({"value": [{"id": "s1", "displayName": "Install brew"}, {"id": "s2", "displayName": "Rotate logs"}]}),
        )],
    );

    let (payload, is_error) = call(&transport, "list_intune_scripts", json!({})).await;

    assert!(!is_error);
    assert_eq!(payload["count"], 3);
    let scripts = payload["scripts"].as_array().expect("scripts");
    assert_eq!(scripts[0]["scriptType"], "PowerShell");
    assert_eq!(scripts[0]["createdDateTime"], "2024-03-01T10:00:00.000Z");
    assert_eq!(scripts[1]["scriptType"], "Shell");
    assert_eq!(scripts[2]["id"], "s2");
    assert!(scripts[1].get("enforceSignatureCheck").is_none());
}

#[tokio::test]
async fn one_failing_script_family_fails_the_listing() {
    let transport = FakeTransport::new();
    transport.route(
        "GET",
        "/beta/deviceManagement/deviceManagementScripts",
        vec![Scripted::json(200, json!({"value": [{"id": "p1"}]}))],
    );
    transport.route(
        "GET",
        "/beta/deviceManagement/deviceShellScripts",
        vec![Scripted::text(400, "{\"error\":{\"code\":\"BadRequest\"}}")],
    );

    let (payload, is_error) = call(&transport, "list_intune_scripts", json!({})).await;

    assert!(is_error);
    assert_eq!(payload["status_code"], 400);
    assert!(payload.get("scripts").is_none());
}

#[tokio::test]
async fn enrollment_status_pages_are_filtered_by_type() {
    let transport = FakeTransport::new();
    transport.route(
        "GET",
        "/beta/deviceManagement/deviceEnrollmentConfigurations",
        vec![Scripted::json(
            200,
            json!({"value": [
                {"id": "e1", "@odata.type": "#microsoft.graph.windows10EnrollmentCompletionPageConfiguration", "displayName": "Default ESP", "showInstallationProgress": true},
                {"id": "e2", "@odata.type": "#microsoft.graph.deviceEnrollmentLimitConfiguration"},
                {"id": "e3", "@odata.type": "#microsoft.graph.Windows10EnrollmentCompletionPageConfiguration"},
            ]}),
        )],
    );

    let (payload, _) = call(&transport, "list_enrollment_status_page_profiles", json!({})).await;

    assert_eq!(payload["count"], 2);
    let profiles = payload["esp_profiles"].as_array().expect("profiles");
    assert_eq!(profiles[0]["id"], "e1");
    assert_eq!(profiles[0]["showInstallationProgress"], true);
    assert_eq!(profiles[1]["id"], "e3");
}

#[tokio::test]
async fn android_view_reports_three_sections_and_a_total() {
    let transport = FakeTransport::new();
    transport.route(
        "GET",
        "/beta/deviceManagement/deviceConfigurations",
        vec![Scripted::json(
            200,
            json!({"value": [
                {"id": "c1", "@odata.type": "#microsoft.graph.androidWorkProfileGeneralDeviceConfiguration"},
                {"id": "c2", "@odata.type": "#microsoft.graph.iosGeneralDeviceConfiguration"},
                {"id": "c3", "@odata.type": "#microsoft.graph.androidDeviceOwnerGeneralDeviceConfiguration"},
            ]}),
        )],
    );
    transport.route(
        "GET",
        "/beta/deviceManagement/deviceEnrollmentConfigurations",
        vec![Scripted::json(
            200,
            json!({"value": [{"id": "n1", "@odata.type": "#microsoft.graph.androidForWorkEnrollmentProfile"}]}),
        )],
    );
    transport.route(
        "GET",
        "/v1.0/deviceManagement/deviceCompliancePolicies",
        vec![Scripted::json(
            200,
            json!({"value": [{"id": "p1", "@odata.type": "#microsoft.graph.windows10CompliancePolicy"}]}),
        )],
    );

    let (payload, is_error) = call(&transport, "list_android_management_profiles", json!({})).await;

    assert!(!is_error);
    assert_eq!(payload["device_configurations"].as_array().map(Vec::len), Some(2));
    assert_eq!(payload["device_configurations"][0]["type"], "androidWorkProfileGeneralDeviceConfiguration");
    assert_eq!(payload["enrollment_configurations"].as_array().map(Vec::len), Some(1));
    assert_eq!(payload["compliance_policies"], json!([]));
    assert_eq!(payload["total_count"], 3);
}

#[tokio::test]
async fn tunnel_servers_are_tagged_with_their_site() {
    let transport = FakeTransport::new();
    transport.route(
        "GET",
        "/beta/deviceManagement/microsoftTunnelSites",
        vec![Scripted::json(
            200,
            json!({"value": [
                {"id": "s1", "displayName": "Seattle"},
                {"id": "s2", "displayName": "Dublin"},
            ]}),
        )],
    );
    transport.route(
        "GET",
        "/beta/deviceManagement/microsoftTunnelSites/s1/microsoftTunnelServers",
        vec![Scripted::json(
            200,
            json!({"value": [
                {"id": "t1", "displayName": "gw-1", "tunnelServerHealthStatus": "healthy", "lastCheckinDateTime": "2024-05-01T08:30:00.1234567Z"},
                {"id": "t2", "displayName": "gw-2", "tunnelServerHealthStatus": "unhealthy"},
            ]}),
        )],
    );
    transport.route(
        "GET",
        "/beta/deviceManagement/microsoftTunnelSites/s2/microsoftTunnelServers",
        vec![Scripted::json(200, json!({"value": [{"id": "t3", "displayName": "gw-3"}]}))],
    );

    let (payload, is_error) = call(&transport, "list_microsoft_tunnel_servers", json!({})).await;

    assert!(!is_error);
    assert_eq!(payload["count"], 3);
    let servers = payload["tunnel_servers"].as_array().expect("servers");
    assert_eq!(servers[0]["siteName"], "Seattle");
    assert_eq!(servers[0]["siteId"], "s1");
    assert_eq!(servers[0]["lastCheckinDateTime"], "2024-05-01T08:30:00.123Z");
    assert_eq!(servers[2]["siteName"], "Dublin");
}

#[tokio::test]
async fn tunnel_server_failure_for_one_site_fails_the_call() {
    let transport = FakeTransport::new();
    transport.route(
        "GET",
        "/beta/deviceManagement/microsoftTunnelSites",
        vec![Scripted::json(200, json!({"value": [{"id": "s1", "displayName": "Seattle"}]}))],
    );
    transport.route(
        "GET",
        "/beta/deviceManagement/microsoftTunnelSites/s1/microsoftTunnelServers",
        vec![Scripted::text(404, "not here")],
    );

    let (payload, is_error) = call(&transport, "list_microsoft_tunnel_servers", json!({})).await;

    assert!(is_error);
    assert_eq!(payload["status_code"], 404);
}

#[tokio::test]
async fn sharepoint_sites_use_the_search_query() {
    let transport = FakeTransport::new();
    transport.route(
        "GET",
        "/v1.0/sites",
        vec![Scripted::json(
            200,
            json!({"value": [{"id": "contoso.sharepoint.com,1,2", "name": "hr", "displayName": "HR", "webUrl": "https://contoso.sharepoint.com/sites/hr"}]}),
        )],
    );

    let (payload, _) = call(&transport, "list_sharepoint_sites", json!({})).await;

    assert_eq!(payload["count"], 1);
    assert_eq!(payload["sites"][0]["displayName"], "HR");
    assert_eq!(transport.calls()[0].key, "/v1.0/sites?search=*");
}

#[tokio::test]
async fn text_file_lands_in_the_users_drive() {
    let transport = FakeTransport::new();
    transport.route(
        "PUT",
        "/v1.0/users/u1/drive/root:/Notes/todo.txt:/content",
        vec![Scripted::json(
            201,
            json!({"id": "i1", "name": "todo.txt", "size": 5, "webUrl": "https://x/todo.txt", "createdDateTime": "2024-01-01T00:00:00Z", "lastModifiedDateTime": "2024-01-01T00:00:00Z", "eTag": "e"}),
        )],
    );

    let (payload, is_error) = call(
        &transport,
        "create_file_in_onedrive",
        json!({"user_id": "u1", "file_name": "todo.txt", "content": "hello", "folder_path": "/Notes/"}),
    )
    .await;

    assert!(!is_error);
    assert_eq!(payload["name"], "todo.txt");
    assert_eq!(payload["lastModifiedDateTime"], "2024-01-01T00:00:00Z");
    assert!(payload.get("eTag").is_none());
    let upload = &transport.calls()[0];
    assert_eq!(upload.content_type.as_deref(), Some("text/plain"));
    assert_eq!(upload.body.as_deref(), Some(&b"hello"[..]));
}

#[tokio::test]
async fn csv_file_is_written_with_quoting() {
    let transport = FakeTransport::new();
    transport.route(
        "PUT",
        "/v1.0/sites/site-1/drive/root:/people.csv:/content",
        vec![Scripted::json(201, json!({"id": "i2", "name": "people.csv", "size": 34}))],
    );

    let (payload, is_error) = call(
        &transport,
        "create_csv_file",
        json!({
            "location_type": "sharepoint",
            "location_id": "site-1",
            "file_name": "people.csv",
            "data": [["name", "note"], ["Ada", "likes, commas"]],
        }),
    )
    .await;

    assert!(!is_error);
    assert_eq!(payload["id"], "i2");
    let upload = &transport.calls()[0];
    assert_eq!(upload.content_type.as_deref(), Some("text/csv"));
    assert_eq!(
        upload.body.as_deref(),
        Some(&b"name,note\r\nAda,\"likes, commas\"\r\n"[..])
    );
}

#[tokio::test]
async fn csv_file_is_read_back_as_rows() {
    let transport = FakeTransport::new();
    transport.route(
        "GET",
        "/v1.0/users/u1/drive/items/f9/content",
        vec![Scripted::text(200, "name,age\r\nAda,36\r\n")],
    );

    let (payload, is_error) = call(
        &transport,
        "read_csv_file",
        json!({"location_type": "onedrive", "location_id": "u1", "file_id": "f9"}),
    )
    .await;

    assert!(!is_error);
    assert_eq!(payload["data"], json!([["name", "age"], ["Ada", "36"]]));
    assert_eq!(payload["rows"], 2);
    assert_eq!(payload["columns"], 2);
}

#[tokio::test]
async fn pdf_conversion_runs_three_steps() {
    let transport = FakeTransport::new();
    transport.route(
        "GET",
        "/v1.0/users/u1/drive/items/f1",
        vec![Scripted::json(200, json!({"id": "f1", "name": "Quarterly.docx"}))],
    );
    transport.route(
        "GET",
        "/v1.0/users/u1/drive/items/f1/content?format=pdf",
        vec![Scripted::bytes(200, b"%PDF-1.7")],
    );
    transport.route(
        "PUT",
        "/v1.0/users/u1/drive/root:/Exports/Quarterly.pdf:/content",
        vec![Scripted::json(201, json!({"id": "p1", "name": "Quarterly.pdf", "size": 8}))],
    );

    let (payload, is_error) = call(
        &transport,
        "convert_file_to_pdf",
        json!({"location_type": "onedrive", "location_id": "u1", "file_id": "f1", "output_folder": "Exports"}),
    )
    .await;

    assert!(!is_error);
    assert_eq!(payload["name"], "Quarterly.pdf");
    assert_eq!(payload["originalFile"], "Quarterly.docx");
    let calls = transport.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2].content_type.as_deref(), Some("application/pdf"));
    assert_eq!(calls[2].body.as_deref(), Some(&b"%PDF-1.7"[..]));
}

#[tokio::test]
async fn pdf_conversion_failure_names_the_step() {
    let transport = FakeTransport::new();
    transport.route(
        "GET",
        "/v1.0/users/u1/drive/items/f1",
        vec![Scripted::json(200, json!({"id": "f1", "name": "photo.heic"}))],
    );
    transport.route(
        "GET",
        "/v1.0/users/u1/drive/items/f1/content?format=pdf",
        vec![Scripted::text(406, "{\"error\":{\"code\":\"notSupported\"}}")],
    );

    let (payload, is_error) = call(
        &transport,
        "convert_file_to_pdf",
        json!({"location_type": "onedrive", "location_id": "u1", "file_id": "f1"}),
    )
    .await;

    assert!(is_error);
    assert_eq!(payload["error"], "Failed to convert file");
    assert_eq!(payload["status_code"], 406);
    assert!(payload["details"].as_str().unwrap_or_default().contains("notSupported"));
    assert_eq!(transport.calls_to("PUT", "/v1.0/users/u1/drive/root:/photo.pdf:/content"), 0);
}

#[tokio::test]
async fn slide_export_uploads_the_thumbnail() {
    let transport = FakeTransport::new();
    transport.route(
        "GET",
        "/v1.0/sites/site-1/drive/items/d1",
        vec![Scripted::json(200, json!({"id": "d1", "name": "Roadmap.pptx"}))],
    );
    transport.route(
        "GET",
        "/v1.0/sites/site-1/drive/items/d1/thumbnails/0/large/content",
        vec![Scripted::bytes(200, b"\x89PNG")],
    );
    transport.route(
        "PUT",
        "/v1.0/sites/site-1/drive/root:/Roadmap_slide3.png:/content",
        vec![Scripted::json(201, json!({"id": "img1", "name": "Roadmap_slide3.png", "size": 4, "webUrl": "https://x/img"}))],
    );

    let (payload, is_error) = call(
        &transport,
        "export_powerpoint_slide_as_image",
        json!({"location_type": "sharepoint", "location_id": "site-1", "file_id": "d1", "slide_index": 3}),
    )
    .await;

    assert!(!is_error);
    assert_eq!(payload["name"], "Roadmap_slide3.png");
    assert_eq!(payload["slideIndex"], 3);
    assert_eq!(payload["format"], "png");
    assert_eq!(transport.calls()[2].content_type.as_deref(), Some("image/png"));
}

#[tokio::test]
async fn unknown_drive_location_is_rejected_before_any_request() {
    let transport = FakeTransport::new();
    let app = test_app(transport.clone());

    let err = app
        .tool_executor
        .execute(
            "read_csv_file",
            json!({"location_type": "dropbox", "location_id": "x", "file_id": "f"}),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, ToolErrorKind::InvalidParams);
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn continuation_links_are_followed_by_tools() {
    let transport = FakeTransport::new();
    transport.route(
        "GET",
        "/beta/deviceAppManagement/mobileApps",
        vec![Scripted::json(
            200,
            json!({
                "value": [{"id": "a1", "displayName": "Teams"}],
                "@odata.nextLink": format!("{}/beta/deviceAppManagement/mobileApps?$skiptoken=2", BASE_URL),
            }),
        )],
    );
    transport.route(
        "GET",
        "/beta/deviceAppManagement/mobileApps?$skiptoken=2",
        vec![Scripted::json(200, json!({"value": [{"id": "a2", "displayName": "Outlook"}]}))],
    );

    let (payload, _) = call(&transport, "list_intune_applications", json!({})).await;

    assert_eq!(payload["count"], 2);
    assert_eq!(payload["applications"][1]["displayName"], "Outlook");
}
